use crate::types::{AgentProfile, EvolutionStrategy, Personality, PersonalityPreset};

/// Fraction of prior trait values retained through a radical
/// transformation.
const RADICAL_CARRYOVER: f64 = 0.3;

/// Composite performance score in [0,1] blending the rolling success rate
/// with observed output quality.
#[must_use]
pub fn performance_score(agent: &AgentProfile) -> f64 {
    let success = agent
        .experience
        .rolling_success_rate(1)
        .unwrap_or(if agent.experience.tasks_completed == 0 {
            0.5
        } else {
            0.0
        });
    (success * 0.6 + agent.experience.avg_quality * 0.4).clamp(0.0, 1.0)
}

/// Deterministic strategy selection from the agent's current shape.
///
/// Cascade order: sustained low performance wins, then broad weakness,
/// then collaboration deficits, then specialization on clear strengths.
#[must_use]
pub fn choose_strategy(agent: &AgentProfile) -> EvolutionStrategy {
    let score = performance_score(agent);
    if score < 0.3 && agent.experience.tasks_completed >= 3 {
        return EvolutionStrategy::RadicalTransformation;
    }
    if agent.personality.weak_traits().len() > 2 {
        return EvolutionStrategy::PersonalityDrift;
    }
    if agent.personality.get("collaborative").unwrap_or(0.5) < 0.3 {
        return EvolutionStrategy::CollaborativeAdaptation;
    }
    if agent.personality.dominant_traits().len() >= 2 {
        return EvolutionStrategy::RoleSpecialization;
    }
    EvolutionStrategy::PersonalityDrift
}

/// Result of applying a strategy: the mutated personality, an optional
/// narrowed goal, and the reason recorded on the event.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub personality: Personality,
    pub goal: Option<String>,
    pub reason: String,
}

#[must_use]
pub fn apply_strategy(strategy: EvolutionStrategy, agent: &AgentProfile) -> StrategyOutcome {
    match strategy {
        EvolutionStrategy::PersonalityDrift => personality_drift(agent),
        EvolutionStrategy::RoleSpecialization => role_specialization(agent),
        EvolutionStrategy::CollaborativeAdaptation => collaborative_adaptation(agent),
        EvolutionStrategy::RadicalTransformation => radical_transformation(agent),
    }
}

/// Small adjustments on one to three traits, biased toward the axes that
/// correlate with positive outcomes when performance lags.
fn personality_drift(agent: &AgentProfile) -> StrategyOutcome {
    let mut personality = agent.personality.clone();
    let mut touched = Vec::new();
    let struggling = performance_score(agent) < 0.6;

    if struggling {
        for name in ["adaptable", "collaborative", "analytical"] {
            if touched.len() >= 3 {
                break;
            }
            personality.adjust(name, 0.1);
            touched.push(name);
        }
        if touched.len() < 3 && personality.get("risk_taking").unwrap_or(0.0) > 0.7 {
            personality.adjust("risk_taking", -0.1);
            touched.push("risk_taking");
        }
    } else {
        // Performing well: reinforce the strongest axis slightly.
        if let Some(best) = agent.personality.ranked_ascending().last().cloned() {
            personality.adjust(&best, 0.05);
            touched.push("strongest");
        }
    }

    StrategyOutcome {
        personality,
        goal: None,
        reason: format!(
            "personality drift across {} trait(s), performance {:.2}",
            touched.len(),
            performance_score(agent)
        ),
    }
}

/// Push the dominant trait further up and soften the two weakest, then
/// narrow the goal toward the dominant strength.
fn role_specialization(agent: &AgentProfile) -> StrategyOutcome {
    let mut personality = agent.personality.clone();
    let dominant = agent
        .personality
        .dominant_traits()
        .into_iter()
        .next()
        .unwrap_or_else(|| "analytical".to_string());
    personality.adjust(&dominant, 0.1);

    let weakest: Vec<String> = agent
        .personality
        .ranked_ascending()
        .into_iter()
        .filter(|name| name != &dominant)
        .take(2)
        .collect();
    for name in &weakest {
        personality.adjust(name, -0.05);
    }

    let goal = format!("{} (specializing on {dominant} strengths)", agent.goal);
    StrategyOutcome {
        personality,
        goal: Some(goal),
        reason: format!("role specialization toward {dominant}"),
    }
}

fn collaborative_adaptation(agent: &AgentProfile) -> StrategyOutcome {
    let mut personality = agent.personality.clone();
    personality.adjust("collaborative", 0.15);
    if personality.get("risk_taking").unwrap_or(0.0) > 0.6 {
        personality.adjust("risk_taking", -0.1);
    }
    StrategyOutcome {
        personality,
        goal: None,
        reason: "collaborative adaptation to improve team dynamics".to_string(),
    }
}

/// Replace the personality with a template, keeping 30% of the prior
/// values. Reserved for sustained low performance.
fn radical_transformation(agent: &AgentProfile) -> StrategyOutcome {
    let template = transformation_template(agent);
    let mut personality = agent.personality.clone();
    for (name, template_value) in template.traits().iter() {
        let prior = agent.personality.get(name).unwrap_or(0.5);
        personality.set(
            name.to_string(),
            template_value * (1.0 - RADICAL_CARRYOVER) + prior * RADICAL_CARRYOVER,
        );
    }
    StrategyOutcome {
        personality,
        goal: None,
        reason: format!(
            "radical transformation onto {} template after sustained low performance",
            template.as_str()
        ),
    }
}

/// Pick the template farthest from the agent's current failure mode: low
/// adaptability pulls toward the innovator template, low collaboration
/// toward the diplomat, anything else toward the executor.
fn transformation_template(agent: &AgentProfile) -> PersonalityPreset {
    if agent.personality.get("adaptable").unwrap_or(0.5) < 0.4 {
        PersonalityPreset::Innovator
    } else if agent.personality.get("collaborative").unwrap_or(0.5) < 0.4 {
        PersonalityPreset::Diplomat
    } else {
        PersonalityPreset::Executor
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{apply_strategy, choose_strategy, performance_score};
    use crate::types::{AgentId, AgentProfile, EvolutionStrategy};

    fn agent() -> AgentProfile {
        AgentProfile::new(
            AgentId::new("agent-1"),
            "Writer".into(),
            "write docs".into(),
            "bio".into(),
        )
    }

    fn failing_agent() -> AgentProfile {
        let mut a = agent();
        for _ in 0..10 {
            a.experience.record_task(false, 0.1);
        }
        a
    }

    #[test]
    fn sustained_low_performance_selects_radical() {
        let a = failing_agent();
        assert!(performance_score(&a) < 0.3);
        assert_eq!(
            choose_strategy(&a),
            EvolutionStrategy::RadicalTransformation
        );
    }

    #[test]
    fn dominant_traits_select_specialization() {
        let mut a = agent();
        a.personality.set("analytical", 0.9);
        a.personality.set("decisive", 0.8);
        for _ in 0..5 {
            a.experience.record_task(true, 0.9);
        }
        assert_eq!(choose_strategy(&a), EvolutionStrategy::RoleSpecialization);
    }

    #[test]
    fn low_collaboration_selects_collaborative_adaptation() {
        let mut a = agent();
        a.personality.set("collaborative", 0.2);
        for _ in 0..5 {
            a.experience.record_task(true, 0.9);
        }
        assert_eq!(
            choose_strategy(&a),
            EvolutionStrategy::CollaborativeAdaptation
        );
    }

    #[test]
    fn all_strategies_keep_traits_in_bounds() {
        for strategy in EvolutionStrategy::all() {
            let outcome = apply_strategy(strategy, &failing_agent());
            for (name, value) in outcome.personality.iter() {
                assert!(
                    (0.0..=1.0).contains(&value),
                    "{strategy} pushed {name} to {value}"
                );
            }
        }
    }

    #[test]
    fn specialization_narrows_goal_text() {
        let mut a = agent();
        a.personality.set("creative", 0.9);
        let outcome = apply_strategy(EvolutionStrategy::RoleSpecialization, &a);
        let goal = outcome.goal.expect("goal narrowed");
        assert!(goal.contains("creative"));
        assert!(goal.contains("write docs"));
    }

    #[test]
    fn collaborative_adaptation_bumps_axis() {
        let a = agent();
        let outcome = apply_strategy(EvolutionStrategy::CollaborativeAdaptation, &a);
        let before = a.personality.get("collaborative").unwrap_or(0.0);
        let after = outcome.personality.get("collaborative").unwrap_or(0.0);
        assert!((after - before - 0.15).abs() < 1e-9);
    }

    #[test]
    fn radical_transformation_keeps_some_prior_signal() {
        let mut a = agent();
        a.personality.set("analytical", 1.0);
        for _ in 0..10 {
            a.experience.record_task(false, 0.0);
        }
        let outcome = apply_strategy(EvolutionStrategy::RadicalTransformation, &a);
        let analytical = outcome.personality.get("analytical").unwrap_or(0.0);
        // 70% template + 30% of the prior 1.0.
        assert!(analytical > 0.3);
    }
}
