//! The planner turn (§4.6): one LLM call that decomposes a Task into an
//! AgentSpec list (Star) or a map/reduce pair (Map-reduce), with malformed
//! output repaired up to twice before falling back to a single agent.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use swarm_core::Error;

use crate::swarm::SwarmTask;

/// One role the planner assigns to an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanAgentEntry {
    pub role: String,
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StarPlan {
    pub agents: Vec<PlanAgentEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapReducePlan {
    pub map: PlanAgentEntry,
    #[serde(default)]
    pub partitions: Vec<String>,
    pub reduce: PlanAgentEntry,
}

/// Builds the initial planner prompt for the Star topology.
pub fn star_prompt(task: &SwarmTask) -> String {
    format!(
        "You are decomposing a task for a swarm of cooperating agents.\n\
         \n\
         Task: {prompt}\n\
         \n\
         Produce a JSON object with a single key \"agents\", an array of at most {max} \
         entries, each with:\n\
         - \"role\": a short role name (e.g. \"researcher\", \"coder\")\n\
         - \"prompt\": the instructions and task slice this agent should work from\n\
         - \"tools\": an array of tool names this agent may call (may be empty)\n\
         \n\
         The agents' slices should be disjoint pieces of the task so they can work in \
         parallel. Respond with ONLY the JSON object, no other text.",
        prompt = task.prompt,
        max = task.max_agents,
    )
}

/// Builds the initial planner prompt for the Map-reduce topology.
pub fn map_reduce_prompt(task: &SwarmTask) -> String {
    format!(
        "You are decomposing a task for a swarm of cooperating agents using a \
         map-reduce strategy.\n\
         \n\
         Task: {prompt}\n\
         \n\
         Produce a JSON object with three keys:\n\
         - \"map\": {{\"role\", \"prompt\", \"tools\"}} — the single role every mapper runs, \
           as a template instruction\n\
         - \"partitions\": an array of at most {max_mappers} strings, one per mapper, each \
           the specific input slice for that mapper\n\
         - \"reduce\": {{\"role\", \"prompt\", \"tools\"}} — the role that combines every \
           mapper's output into the final answer\n\
         \n\
         Respond with ONLY the JSON object, no other text.",
        prompt = task.prompt,
        max_mappers = task.max_agents.saturating_sub(1).max(1),
    )
}

/// Builds a repair prompt including the parser error, per §4.6 ("retries up
/// to 2 times with a repair prompt that includes the parse error").
pub fn repair_prompt(original: &str, raw_response: &str, parse_error: &str) -> String {
    format!(
        "{original}\n\
         \n\
         Your previous response could not be parsed as the required JSON: {raw_response}\n\
         \n\
         Parse error: {parse_error}\n\
         \n\
         Respond again with ONLY a valid JSON object matching the schema above."
    )
}

/// Extracts the outermost `{...}` span from `text` and deserializes it.
/// LLMs routinely wrap JSON in prose or code fences; this tolerates that
/// without requiring a specific fence syntax.
fn parse_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, Error> {
    let start = text
        .find('{')
        .ok_or_else(|| Error::plan_invalid("no JSON object found in planner response"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| Error::plan_invalid("no JSON object found in planner response"))?;
    if end <= start {
        return Err(Error::plan_invalid("malformed JSON object in planner response"));
    }
    let candidate = &text[start..=end];
    serde_json::from_str::<JsonValue>(candidate)
        .map_err(|e| Error::plan_invalid(format!("invalid JSON: {e}")))
        .and_then(|v| serde_json::from_value(v).map_err(|e| Error::plan_invalid(format!("schema mismatch: {e}"))))
}

pub fn parse_star_plan(text: &str) -> Result<StarPlan, Error> {
    let plan: StarPlan = parse_json(text)?;
    if plan.agents.is_empty() {
        return Err(Error::plan_invalid("planner returned zero agents"));
    }
    Ok(plan)
}

pub fn parse_map_reduce_plan(text: &str) -> Result<MapReducePlan, Error> {
    let plan: MapReducePlan = parse_json(text)?;
    if plan.partitions.is_empty() {
        return Err(Error::plan_invalid("planner returned zero partitions"));
    }
    Ok(plan)
}

/// The single-agent fallback used after 3 failed planning attempts (§4.6
/// "falls back to a single-agent plan with the original task as the role
/// prompt").
pub fn single_agent_fallback(task: &SwarmTask, available_tools: &[&str]) -> StarPlan {
    StarPlan {
        agents: vec![PlanAgentEntry {
            role: "solver".to_string(),
            prompt: task.prompt.clone(),
            tools: available_tools.iter().map(|s| s.to_string()).collect(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_star_plan_tolerates_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"agents\":[{\"role\":\"r\",\"prompt\":\"p\",\"tools\":[]}]}\n```\nLet me know if you need more.";
        let plan = parse_star_plan(text).unwrap();
        assert_eq!(plan.agents.len(), 1);
        assert_eq!(plan.agents[0].role, "r");
    }

    #[test]
    fn test_parse_star_plan_rejects_empty_agent_list() {
        let text = "{\"agents\":[]}";
        assert!(parse_star_plan(text).is_err());
    }

    #[test]
    fn test_parse_star_plan_rejects_non_json() {
        let text = "I cannot produce a plan for this.";
        assert!(parse_star_plan(text).is_err());
    }

    #[test]
    fn test_single_agent_fallback_uses_original_task_as_prompt() {
        let task = SwarmTask::new("t1", "do the thing", 5);
        let plan = single_agent_fallback(&task, &["read_file"]);
        assert_eq!(plan.agents.len(), 1);
        assert_eq!(plan.agents[0].prompt, "do the thing");
        assert_eq!(plan.agents[0].tools, vec!["read_file".to_string()]);
    }
}
