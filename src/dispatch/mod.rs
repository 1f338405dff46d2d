#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

mod handlers;

use crate::app::AppContext;
use crate::error::{CrewError, Result};
use crate::metrics::Metrics;
use crate::security::validation::{FieldKind, FieldSpec};
use crate::security::ArgSchema;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::debug;

/// One tool binding: name, docs, required permission glob, whether it
/// mutates state, and its argument schema.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub permission: &'static str,
    pub mutating: bool,
    /// Overrides the process-wide tool deadline when set.
    pub deadline_secs: Option<u64>,
    pub schema: ArgSchema,
}

const CREW_ID_ONLY: ArgSchema = ArgSchema {
    fields: &[FieldSpec::required_text("crew_id")],
};
const AGENT_ID_ONLY: ArgSchema = ArgSchema {
    fields: &[FieldSpec::required_text("agent_id")],
};

static TOOLS: &[ToolDef] = &[
    ToolDef {
        name: "create_evolving_crew",
        description: "Create a crew of evolving agents with a task list",
        permission: "create_evolving_crew",
        mutating: true,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[
                FieldSpec::required_text("crew_name"),
                FieldSpec {
                    name: "agents_config",
                    required: true,
                    kind: FieldKind::Array { max_len: 50 },
                },
                FieldSpec {
                    name: "tasks",
                    required: true,
                    kind: FieldKind::Array { max_len: 100 },
                },
                FieldSpec {
                    name: "autonomy_level",
                    required: false,
                    kind: FieldKind::Number { min: 0.0, max: 1.0 },
                },
            ],
        },
    },
    ToolDef {
        name: "run_autonomous_crew",
        description: "Start an autonomous execution for a crew",
        permission: "run_autonomous_crew",
        mutating: true,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[
                FieldSpec::required_text("crew_id"),
                FieldSpec {
                    name: "context",
                    required: false,
                    kind: FieldKind::Object,
                },
                FieldSpec {
                    name: "allow_evolution",
                    required: false,
                    kind: FieldKind::Bool,
                },
            ],
        },
    },
    ToolDef {
        name: "get_crew_status",
        description: "Crew state, members, and latest workflow",
        permission: "get_crew_status",
        mutating: false,
        deadline_secs: None,
        schema: CREW_ID_ONLY,
    },
    ToolDef {
        name: "list_active_crews",
        description: "All crews with aggregate counts",
        permission: "list_active_crews",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema::EMPTY,
    },
    ToolDef {
        name: "crew_self_assessment",
        description: "Skill coverage, gaps, and recommendations for a crew",
        permission: "crew_self_assessment",
        mutating: true,
        // May commit imbalance-triggered evolutions for several members.
        deadline_secs: Some(60),
        schema: CREW_ID_ONLY,
    },
    ToolDef {
        name: "disband_crew",
        description: "Disband an idle crew, preserving agent memory",
        permission: "disband_crew",
        mutating: true,
        deadline_secs: None,
        schema: CREW_ID_ONLY,
    },
    ToolDef {
        name: "add_dynamic_instruction",
        description: "Send a prioritized instruction to a crew mid-run",
        permission: "add_dynamic_instruction",
        mutating: true,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[
                FieldSpec::required_text("crew_id"),
                FieldSpec::required_text("instruction"),
                FieldSpec::required_text("instruction_type"),
                FieldSpec {
                    name: "priority",
                    required: true,
                    kind: FieldKind::Integer { min: 1, max: 5 },
                },
            ],
        },
    },
    ToolDef {
        name: "list_dynamic_instructions",
        description: "Instructions submitted to a crew, optionally by status",
        permission: "list_dynamic_instructions",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[
                FieldSpec::required_text("crew_id"),
                FieldSpec::optional_text("status"),
            ],
        },
    },
    ToolDef {
        name: "get_instruction_status",
        description: "Delivery status of one instruction",
        permission: "get_instruction_status",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[FieldSpec::required_text("instruction_id")],
        },
    },
    ToolDef {
        name: "trigger_agent_evolution",
        description: "Explicitly evolve one agent",
        permission: "trigger_agent_evolution",
        mutating: true,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[
                FieldSpec::required_text("agent_id"),
                FieldSpec::optional_text("evolution_type"),
                FieldSpec {
                    name: "force",
                    required: false,
                    kind: FieldKind::Bool,
                },
            ],
        },
    },
    ToolDef {
        name: "get_agent_reflection",
        description: "An agent's reflections and performance metrics",
        permission: "get_agent_reflection",
        mutating: false,
        deadline_secs: None,
        schema: AGENT_ID_ONLY,
    },
    ToolDef {
        name: "create_agent_from_template",
        description: "Create a standalone agent from a personality template",
        permission: "create_agent_from_template",
        mutating: true,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[
                FieldSpec::required_text("template"),
                FieldSpec::required_text("role"),
                FieldSpec::optional_text("goal"),
                FieldSpec::optional_text("backstory"),
            ],
        },
    },
    ToolDef {
        name: "get_agent_details",
        description: "Full profile of one agent",
        permission: "get_agent_details",
        mutating: false,
        deadline_secs: None,
        schema: AGENT_ID_ONLY,
    },
    ToolDef {
        name: "get_live_events",
        description: "Recent audit and evolution events",
        permission: "get_live_events",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema {
            fields: &[FieldSpec {
                name: "limit",
                required: false,
                kind: FieldKind::Integer { min: 1, max: 500 },
            }],
        },
    },
    ToolDef {
        name: "get_evolution_summary",
        description: "Aggregate evolution statistics",
        permission: "get_evolution_summary",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema::EMPTY,
    },
    ToolDef {
        name: "health_check",
        description: "Component health and uptime",
        permission: "health_check",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema::EMPTY,
    },
    ToolDef {
        name: "get_server_config",
        description: "Sanitized configuration snapshot",
        permission: "get_server_config",
        mutating: false,
        deadline_secs: None,
        schema: ArgSchema::EMPTY,
    },
    ToolDef {
        name: "reload_config",
        description: "Re-read the reloadable configuration subset",
        permission: "reload_config",
        mutating: true,
        deadline_secs: None,
        schema: ArgSchema::EMPTY,
    },
];

#[must_use]
pub fn tool_defs() -> &'static [ToolDef] {
    TOOLS
}

#[must_use]
pub fn find_tool(name: &str) -> Option<&'static ToolDef> {
    TOOLS.iter().find(|def| def.name == name)
}

/// `tools/list` payload.
#[must_use]
pub fn tool_listing() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|def| {
            json!({
                "name": def.name,
                "description": def.description,
                "inputSchema": def.schema.json_schema(),
                "annotations": { "readOnlyHint": !def.mutating },
            })
        })
        .collect();
    json!({ "tools": tools })
}

/// Binds tool names to handlers behind the security gate.
pub struct Dispatcher {
    ctx: AppContext,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub const fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Full pipeline for one tool call: gate, deadline, handler, audit.
    ///
    /// # Errors
    /// Any taxonomy error; messages are sanitized at the transport layer.
    pub async fn dispatch(
        &self,
        credential: Option<&str>,
        tool: &str,
        mut args: Map<String, Value>,
    ) -> Result<Value> {
        let Some(def) = find_tool(tool) else {
            return Err(CrewError::NotFound(format!("tool {tool}")));
        };
        Metrics::incr(&self.ctx.metrics.requests_total);

        let auth = self
            .ctx
            .gate
            .admit(credential, tool, &def.schema, &mut args)
            .await
            .inspect_err(|_| Metrics::incr(&self.ctx.metrics.requests_failed))?;

        let started = Instant::now();
        let deadline = def
            .deadline_secs
            .map_or_else(|| self.ctx.current_config().tool_deadline(), std::time::Duration::from_secs);
        let result = match tokio::time::timeout(deadline, self.route(def.name, &args)).await {
            Ok(result) => result,
            Err(_) => Err(CrewError::DeadlineExceeded(format!(
                "tool {tool} exceeded {}s",
                deadline.as_secs()
            ))),
        };

        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let outcome = match &result {
            Ok(_) => "ok".to_string(),
            Err(err) => {
                Metrics::incr(&self.ctx.metrics.requests_failed);
                err.code().to_string()
            }
        };
        self.ctx
            .gate
            .audit_completion(&auth, tool, &args, &outcome, latency_ms)
            .await;
        debug!(tool, outcome, latency_ms, "dispatch complete");
        result
    }

    async fn route(&self, tool: &str, args: &Map<String, Value>) -> Result<Value> {
        let ctx = &self.ctx;
        match tool {
            "create_evolving_crew" => handlers::crew_ops::create_evolving_crew(ctx, args).await,
            "run_autonomous_crew" => handlers::crew_ops::run_autonomous_crew(ctx, args).await,
            "get_crew_status" => handlers::crew_ops::get_crew_status(ctx, args).await,
            "list_active_crews" => handlers::crew_ops::list_active_crews(ctx).await,
            "crew_self_assessment" => handlers::crew_ops::crew_self_assessment(ctx, args).await,
            "disband_crew" => handlers::crew_ops::disband_crew(ctx, args).await,
            "add_dynamic_instruction" => {
                handlers::instruction_ops::add_dynamic_instruction(ctx, args).await
            }
            "list_dynamic_instructions" => {
                handlers::instruction_ops::list_dynamic_instructions(ctx, args).await
            }
            "get_instruction_status" => {
                handlers::instruction_ops::get_instruction_status(ctx, args).await
            }
            "trigger_agent_evolution" => {
                handlers::evolution_ops::trigger_agent_evolution(ctx, args).await
            }
            "get_agent_reflection" => {
                handlers::evolution_ops::get_agent_reflection(ctx, args).await
            }
            "create_agent_from_template" => {
                handlers::evolution_ops::create_agent_from_template(ctx, args).await
            }
            "get_agent_details" => handlers::evolution_ops::get_agent_details(ctx, args).await,
            "get_evolution_summary" => handlers::evolution_ops::get_evolution_summary(ctx).await,
            "get_live_events" => handlers::admin_ops::get_live_events(ctx, args).await,
            "health_check" => handlers::admin_ops::health_check(ctx).await,
            "get_server_config" => handlers::admin_ops::get_server_config(ctx).await,
            "reload_config" => handlers::admin_ops::reload_config(ctx).await,
            other => Err(CrewError::NotFound(format!("tool {other}"))),
        }
    }
}

pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CrewError::InvalidArgument(format!("missing required field: {field}")))
}

pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{find_tool, tool_listing, tool_defs};

    #[test]
    fn registry_covers_the_full_surface() {
        for name in [
            "create_evolving_crew",
            "run_autonomous_crew",
            "get_crew_status",
            "list_active_crews",
            "crew_self_assessment",
            "disband_crew",
            "add_dynamic_instruction",
            "list_dynamic_instructions",
            "get_instruction_status",
            "trigger_agent_evolution",
            "get_agent_reflection",
            "create_agent_from_template",
            "get_agent_details",
            "get_live_events",
            "get_evolution_summary",
            "health_check",
            "get_server_config",
            "reload_config",
        ] {
            assert!(find_tool(name).is_some(), "missing tool {name}");
        }
    }

    #[test]
    fn tool_names_are_unique() {
        let mut names: Vec<&str> = tool_defs().iter().map(|d| d.name).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn listing_renders_schemas() {
        let listing = tool_listing();
        let tools = listing["tools"].as_array().expect("array");
        assert_eq!(tools.len(), tool_defs().len());
        assert!(tools
            .iter()
            .all(|t| t["inputSchema"]["type"] == "object"));
    }
}
