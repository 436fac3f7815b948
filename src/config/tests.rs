#[cfg(test)]
mod tests {
    use crate::config::{Config, OpenRouterConfig};

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.sandbox.command_timeout_secs, 10);
        assert_eq!(config.sandbox.shell_timeout_secs, 15);
        assert_eq!(config.sandbox.script_timeout_secs, 30);
        assert!(config.sandbox.command_timeout_secs < config.sandbox.shell_timeout_secs);
        assert!(config.sandbox.shell_timeout_secs < config.sandbox.script_timeout_secs);
        assert!(config.security.allowed_commands.contains(&"ls".to_string()));
        assert!(config.providers.openrouter.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
[server]
port = 9100

[sandbox]
command_timeout_secs = 3

[admission]
max_requests = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.sandbox.command_timeout_secs, 3);
        assert_eq!(config.sandbox.shell_timeout_secs, 15);
        assert_eq!(config.admission.max_requests, 5);
        assert_eq!(config.admission.window_secs, 30);
        assert_eq!(config.fallback.interpreter, "python3");
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = Config::default();
        config.sandbox.script_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("script_timeout_secs"));
    }

    #[test]
    fn test_rejects_tiny_output_cap() {
        let mut config = Config::default();
        config.sandbox.output_cap_bytes = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_allow_list() {
        let mut config = Config::default();
        config.security.allowed_commands.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid logging.level"));
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut config = Config::default();
        config.admission.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_openrouter_requires_key() {
        let mut config = Config::default();
        config.providers.openrouter = Some(OpenRouterConfig {
            api_key: String::new(),
            model: "openai/gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            timeout_secs: 30,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_get_set_value() {
        let mut config = Config::default();
        config.set_value("sandbox.shell_timeout_secs", "20").unwrap();
        config.set_value("fallback.enabled", "false").unwrap();
        assert_eq!(config.get_value("sandbox.shell_timeout_secs").unwrap(), "20");
        assert_eq!(config.get_value("fallback.enabled").unwrap(), "false");
        assert!(config.set_value("sandbox.shell_timeout_secs", "soon").is_err());
        assert!(config.get_value("nope.nothing").is_err());
    }

    #[test]
    fn test_get_set_tuning_keys() {
        let mut config = Config::default();
        config.set_value("sandbox.display_chars", "500").unwrap();
        config.set_value("admission.max_tracked_clients", "64").unwrap();
        assert_eq!(config.get_value("sandbox.display_chars").unwrap(), "500");
        assert_eq!(config.get_value("admission.max_tracked_clients").unwrap(), "64");
    }

    #[test]
    fn test_saving_keeps_api_key_reference() {
        std::env::set_var("LIA_TEST_OPENROUTER_KEY", "sk-secret-123");
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "[providers.openrouter]\napi_key = \"${LIA_TEST_OPENROUTER_KEY}\"\n",
        )
        .unwrap();

        let mut config = Config::load_from(Some(path.to_str().unwrap())).unwrap();
        let openrouter = config.providers.openrouter.clone().unwrap();
        assert_eq!(openrouter.api_key, "${LIA_TEST_OPENROUTER_KEY}");
        assert_eq!(openrouter.resolved_api_key(), "sk-secret-123");

        config.set_value("server.port", "9000").unwrap();
        config.save(&path).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(!saved.contains("sk-secret-123"));
        assert!(saved.contains("${LIA_TEST_OPENROUTER_KEY}"));
    }

    #[test]
    fn test_redacted_masks_literal_key() {
        let mut config = Config::default();
        config.providers.openrouter = Some(OpenRouterConfig {
            api_key: "sk-literal-456".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            timeout_secs: 30,
        });
        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-literal-456"));
        assert_eq!(
            config.providers.openrouter.as_ref().unwrap().api_key,
            "sk-literal-456"
        );

        config.providers.openrouter.as_mut().unwrap().api_key = "${SOME_KEY}".to_string();
        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(shown.contains("${SOME_KEY}"));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load_from(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[sandbox]\ncommand_timeout_secs = 0\n").unwrap();

        assert!(Config::load_from(Some(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_save_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.port = 8123;
        config.save(&path).unwrap();

        let loaded = Config::load_from(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(loaded.server.port, 8123);
    }
}
