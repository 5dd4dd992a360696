//! Embedded templates written by `judge-runner init`.

/// Default `runner.toml` configuration.
pub(crate) const RUNNER_TOML: &str = include_str!("runner.toml");

/// Example payload for `judge-runner run`.
pub(crate) const SAMPLE_SUBMISSION: &str = include_str!("sample-submission.json");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::payload::Submission;

    #[test]
    fn test_runner_toml_matches_defaults() {
        let config: Config = toml::from_str(RUNNER_TOML).unwrap();
        let defaults = Config::default();
        assert_eq!(config.pool.size, defaults.pool.size);
        assert_eq!(config.pool.name_prefix, defaults.pool.name_prefix);
        assert_eq!(config.sandbox.run_command, defaults.sandbox.run_command);
        assert_eq!(config.sandbox.timeout_ms, defaults.sandbox.timeout_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_submission_parses() {
        let submission = Submission::from_json(SAMPLE_SUBMISSION).unwrap();
        assert_eq!(submission.function_name, "add");
        assert_eq!(submission.tests.len(), 2);
        assert_eq!(submission.tests[0].expect, serde_json::json!(3));

        let raw: serde_json::Value = serde_json::from_str(SAMPLE_SUBMISSION).unwrap();
        assert_eq!(raw["tests"][1]["expect"], -3);
    }
}
