//! Fleet validator & TemplateVersion populator (C5): validates a fleet's
//! provider list against its referenced repositories and allowed template
//! parameters, then freezes a new immutable [`TemplateVersion`] on success.

use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::models::{Condition, ConditionStatus, Fleet};
use corral_db::queries::{events as event_db, fleets as fleet_db, repositories as repo_db, template_versions as tv_db};

use crate::render::schema::{FleetTemplate, InlineProviderConfig, ProviderConfig};
use crate::render::template::{placeholders, Placeholder};

/// One validation failure, attached to `FleetValid=False`'s condition
/// message and recorded in the rejected TemplateVersion's
/// `validation_errors`.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub provider: String,
    pub reason: String,
}

/// Outcome of validating one fleet.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid { template_version_id: Uuid, template_version_name: String },
    Invalid { errors: Vec<ValidationError> },
}

fn validate_provider(provider: &ProviderConfig, repo_names: &[String]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(repo_name) = provider.repository_name() {
        if !repo_names.iter().any(|n| n == repo_name) {
            errors.push(ValidationError {
                provider: provider.name().to_string(),
                reason: format!("references unknown repository {repo_name:?}"),
            });
        }
    }

    if let ProviderConfig::Inline(InlineProviderConfig { content, base64, .. }) = provider {
        for placeholder in placeholders(content) {
            if let Placeholder::Unsupported(expr) = placeholder {
                errors.push(ValidationError {
                    provider: provider.name().to_string(),
                    reason: format!("unsupported template parameter {expr:?}"),
                });
            }
        }
        if *base64 {
            use base64::Engine;
            if base64::engine::general_purpose::STANDARD.decode(content).is_err() {
                errors.push(ValidationError {
                    provider: provider.name().to_string(),
                    reason: "declares base64 encoding but content is not valid base64".to_string(),
                });
            }
        }
    }

    errors
}

/// Validate a fleet's current `template` and, on success, populate the next
/// TemplateVersion. Always updates the fleet's `FleetValid` condition and
/// repository-ref set, win or lose.
pub async fn validate_fleet(pool: &PgPool, fleet: &Fleet) -> anyhow::Result<ValidationOutcome> {
    let repos = repo_db::list_repositories(pool, fleet.org_id).await?;
    let repo_names: Vec<String> = repos.into_iter().map(|r| r.name).collect();

    let parsed: Result<FleetTemplate, _> = serde_json::from_value(fleet.template.clone());
    let (errors, config) = match parsed {
        Ok(template) => {
            let mut errors = Vec::new();
            for provider in &template.spec.config {
                errors.extend(validate_provider(provider, &repo_names));
            }
            (errors, Some(template.spec.config))
        }
        Err(err) => (
            vec![ValidationError {
                provider: "<fleet.template>".to_string(),
                reason: format!("unknown discriminator or malformed template: {err}"),
            }],
            None,
        ),
    };

    set_valid_condition(pool, fleet, errors.is_empty(), &errors).await?;
    record_repository_refs(pool, fleet, &config.unwrap_or_default(), &repo_names).await?;

    if !errors.is_empty() {
        return Ok(ValidationOutcome::Invalid { errors });
    }

    let existing = tv_db::list_for_fleet(pool, fleet.id).await?;
    let name = format!("v{}", existing.len() + 1);
    let tv = tv_db::insert_template_version(
        pool,
        fleet.id,
        &name,
        &fleet.template,
        true,
        &json!([]),
    )
    .await?;

    Ok(ValidationOutcome::Valid {
        template_version_id: tv.id,
        template_version_name: tv.name,
    })
}

async fn set_valid_condition(
    pool: &PgPool,
    fleet: &Fleet,
    valid: bool,
    errors: &[ValidationError],
) -> anyhow::Result<()> {
    let mut conditions: Vec<Condition> =
        serde_json::from_value(fleet.conditions.clone()).unwrap_or_default();

    let message = errors
        .iter()
        .map(|e| format!("{}: {}", e.provider, e.reason))
        .collect::<Vec<_>>()
        .join("; ");

    let condition = Condition {
        kind: "FleetValid".to_string(),
        status: if valid { ConditionStatus::True } else { ConditionStatus::False },
        reason: if valid { "ValidationSucceeded".to_string() } else { "ValidationFailed".to_string() },
        message,
        last_transition_time: chrono::Utc::now(),
    };

    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == "FleetValid") {
        *existing = condition;
    } else {
        conditions.push(condition);
    }

    fleet_db::set_conditions(pool, fleet.id, &serde_json::to_value(&conditions)?).await
}

/// Rewrite the fleet's repository-ref set atomically so the poller (C8) can
/// fan out re-validation/re-render events to the right fleets.
async fn record_repository_refs(
    pool: &PgPool,
    fleet: &Fleet,
    config: &[ProviderConfig],
    repo_names: &[String],
) -> anyhow::Result<()> {
    let refs: Vec<&str> = config
        .iter()
        .filter_map(|p| p.repository_name())
        .filter(|name| repo_names.iter().any(|r| r == name))
        .collect();

    event_db::record_event(
        pool,
        "Fleet",
        fleet.id,
        "ResourceSyncRepositoryRefs",
        &json!({ "repositories": refs }),
    )
    .await?;
    Ok(())
}

/// Build the validation-errors JSON blob stored on an invalid TemplateVersion
/// attempt record (the fleet itself carries the human-readable summary on
/// its `FleetValid` condition; this is the structured form).
pub fn errors_to_json(errors: &[ValidationError]) -> Value {
    json!(errors
        .iter()
        .map(|e| json!({ "provider": e.provider, "reason": e.reason }))
        .collect::<Vec<_>>())
}
