use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("PROJECT_ID environment variable must be set")]
    MissingProjectId,

    #[error("SUBSCRIPTION_ID environment variable must be set")]
    MissingSubscriptionId,

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_required(config)?;
    validate_timings(config)?;
    warn_on_short_timeout(config);
    Ok(())
}

fn validate_required(config: &Config) -> Result<(), ValidationError> {
    if config.project_id.trim().is_empty() {
        return Err(ValidationError::MissingProjectId);
    }
    if config.subscription_id.trim().is_empty() {
        return Err(ValidationError::MissingSubscriptionId);
    }
    Ok(())
}

fn validate_timings(config: &Config) -> Result<(), ValidationError> {
    let positive = [
        ("JOB_DURATION_SEC", config.job_duration_sec),
        ("METRIC_TIMEOUT_SEC", config.metric_timeout_sec),
        ("DECAY_INTERVAL_SEC", config.decay_interval_sec),
        ("WORK_REST_MS", config.work_rest_ms),
        ("PULL_RETRY_MS", config.pull_retry_ms),
    ];

    for (field, value) in positive {
        if value == 0 {
            return Err(ValidationError::NotPositive { field });
        }
    }
    Ok(())
}

/// A timeout shorter than a job lets the gauge drop to zero mid-job
fn warn_on_short_timeout(config: &Config) {
    if config.metric_timeout_sec <= config.job_duration_sec {
        tracing::warn!(
            metric_timeout_sec = config.metric_timeout_sec,
            job_duration_sec = config.job_duration_sec,
            "Metric timeout does not exceed job duration; numJobs may decay while a job is running"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            project_id: "demo".to_string(),
            subscription_id: "work-sub".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_project_id() {
        let config = Config {
            project_id: String::new(),
            ..valid_config()
        };
        assert_eq!(validate(&config), Err(ValidationError::MissingProjectId));
    }

    #[test]
    fn test_blank_subscription_id() {
        let config = Config {
            subscription_id: "   ".to_string(),
            ..valid_config()
        };
        assert_eq!(validate(&config), Err(ValidationError::MissingSubscriptionId));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config {
            metric_timeout_sec: 0,
            ..valid_config()
        };
        assert_eq!(
            validate(&config),
            Err(ValidationError::NotPositive { field: "METRIC_TIMEOUT_SEC" })
        );
    }

    #[test]
    fn test_zero_rest_and_retry_rejected() {
        let config = Config {
            work_rest_ms: 0,
            ..valid_config()
        };
        assert_eq!(
            validate(&config),
            Err(ValidationError::NotPositive { field: "WORK_REST_MS" })
        );

        let config = Config {
            pull_retry_ms: 0,
            ..valid_config()
        };
        assert_eq!(
            validate(&config),
            Err(ValidationError::NotPositive { field: "PULL_RETRY_MS" })
        );
    }

    #[test]
    fn test_short_timeout_is_only_a_warning() {
        let config = Config {
            job_duration_sec: 300,
            metric_timeout_sec: 120,
            ..valid_config()
        };
        assert!(validate(&config).is_ok());
    }
}
