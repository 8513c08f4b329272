//! Tests for the hook-deploy-cli library module.

use super::*;
use hook_deploy_core::{DeploymentRun, ProviderIdentity, RunStatus};

mod parsing_tests {
    use super::*;

    #[test]
    fn test_handle_command_parsing() {
        let cli = Cli::try_parse_from([
            "hook-deploy",
            "handle",
            "--header",
            "User-Agent: GitHub-Hookshot/1",
            "-H",
            "X-GitHub-Event:push",
            "--query",
            "projectid=demo",
            "--body",
            "payload.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Handle {
                headers,
                query,
                body,
            } => {
                assert_eq!(headers.len(), 2);
                assert_eq!(query, vec!["projectid=demo".to_string()]);
                assert_eq!(body, "payload.json");
            }
            other => panic!("Expected Handle command, got: {other:?}"),
        }
    }

    #[test]
    fn test_handle_body_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["hook-deploy", "handle"]).unwrap();
        assert!(matches!(cli.command, Commands::Handle { ref body, .. } if body == "-"));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "hook-deploy",
            "--config",
            "/etc/hook-deploy/custom.yaml",
            "--json-logs",
            "check-config",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/hook-deploy/custom.yaml")));
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_cgi_command_parsing() {
        let cli = Cli::try_parse_from(["hook-deploy", "cgi"]).unwrap();
        assert!(matches!(cli.command, Commands::Cgi));
    }

    #[test]
    fn test_unknown_command_fails() {
        assert!(Cli::try_parse_from(["hook-deploy", "serve"]).is_err());
    }
}

mod argument_tests {
    use super::*;

    #[test]
    fn test_parse_headers_trims_whitespace() {
        let headers = parse_headers(&["X-Gitlab-Token:  s3cret ".to_string()]).unwrap();
        assert_eq!(headers.get("x-gitlab-token"), Some("s3cret"));
    }

    #[test]
    fn test_parse_headers_keeps_colons_in_value() {
        let headers = parse_headers(&["X-Url: https://example.com:8443".to_string()]).unwrap();
        assert_eq!(headers.get("X-Url"), Some("https://example.com:8443"));
    }

    #[test]
    fn test_parse_headers_rejects_missing_separator() {
        let err = parse_headers(&["User-Agent".to_string()]).unwrap_err();
        assert!(
            matches!(err, CliError::InvalidArgument { ref arg, .. } if arg == "--header"),
            "expected InvalidArgument, got: {err:?}"
        );
    }

    #[test]
    fn test_parse_query_pairs() {
        let query = parse_query(&["projectid=demo".to_string(), "token=a=b".to_string()]).unwrap();
        assert_eq!(query.get("projectid"), Some("demo"));
        assert_eq!(query.get("token"), Some("a=b"));
    }

    #[test]
    fn test_parse_query_rejects_missing_separator() {
        assert!(parse_query(&["projectid".to_string()]).is_err());
    }
}

mod cgi_env_tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_header_is_converted_lossily() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (
                OsString::from("HTTP_USER_AGENT"),
                OsString::from_vec(b"GitHub-Hookshot/\xff".to_vec()),
            ),
            (OsString::from("QUERY_STRING"), OsString::from("projectid=demo")),
        ];

        let request = InboundRequest::from_cgi_env(lossy_env(vars), Vec::new());

        assert_eq!(
            request.headers.get("User-Agent"),
            Some("GitHub-Hookshot/\u{FFFD}")
        );
        assert_eq!(request.query.get("projectid"), Some("demo"));
    }

    #[test]
    fn test_utf8_pairs_pass_through() {
        let vars = vec![(OsString::from("CONTENT_TYPE"), OsString::from("application/json"))];

        let pairs: Vec<_> = lossy_env(vars).collect();

        assert_eq!(
            pairs,
            vec![("CONTENT_TYPE".to_string(), "application/json".to_string())]
        );
    }
}

mod response_tests {
    use super::*;

    fn request_headers() -> HeaderMap {
        [("User-Agent", "curl/8.0"), ("Accept", "*/*")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_success_response() {
        let run = DeploymentRun {
            log_path: "/srv/log/demo-abc123.log".into(),
            err_log_path: "/srv/log/demo-abc123.err".into(),
            exit_code: Some(0),
            status: RunStatus::Completed,
            output: "deployed\n".to_string(),
        };

        let response = cgi_response(&Ok(Outcome::Deployed(run)), &request_headers(), true);

        assert_eq!(
            response,
            "Status: 200 OK\r\nContent-Type: text/plain\r\n\r\nExit status: 0\ndeployed\n"
        );
    }

    #[test]
    fn test_pong_response() {
        let outcome = Outcome::Pong {
            provider: ProviderIdentity::GitLab,
        };
        let response = cgi_response(&Ok(outcome), &request_headers(), false);
        assert!(response.starts_with("Status: 200 OK\r\n"));
        assert!(response.ends_with("pong (GitLab)\n"));
    }

    #[test]
    fn test_error_response_uses_error_status() {
        let err = DeployError::UnsupportedProvider {
            user_agent: "curl/8.0".to_string(),
        };

        let response = cgi_response(&Err(err), &request_headers(), false);

        assert!(response.starts_with("Status: 400 Bad Request\r\n"));
        assert!(response.contains("Unsupported User-Agent 'curl/8.0'"));
        assert!(!response.contains("Request Headers"));
    }

    #[test]
    fn test_debug_appends_request_headers() {
        let err = DeployError::Auth {
            message: "Hook secret does not match".to_string(),
        };

        let response = cgi_response(&Err(err), &request_headers(), true);

        assert!(response.starts_with("Status: 403 Forbidden\r\n"));
        assert!(response.contains("---\nRequest Headers:\nAccept: */*\nUser-Agent: curl/8.0\n"));
    }

    #[test]
    fn test_failed_deployment_shows_output() {
        let err = DeployError::DeploymentFailed {
            exit_code: Some(3),
            output: "composer failed\n".to_string(),
        };

        let response = cgi_response(&Err(err), &request_headers(), false);

        assert!(response.starts_with("Status: 500 Internal Server Error\r\n"));
        assert!(response.ends_with("Exit status: 3\ncomposer failed\n"));
    }
}

mod startup_error_tests {
    use super::*;

    #[test]
    fn test_missing_settings_file_renders_500() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Settings::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();

        let response = startup_error_response(&err);

        assert!(
            response.starts_with("Status: 500 Internal Server Error\r\nContent-Type: text/plain\r\n\r\n"),
            "got: {response}"
        );
        assert!(response.contains("Failed to load settings"));
    }

    /// Every status an error maps to has its own reason phrase.
    #[test]
    fn test_error_statuses_have_reason_phrases() {
        let errors = [
            DeployError::MissingParameter {
                name: "projectid".to_string(),
            },
            DeployError::Auth {
                message: "bad".to_string(),
            },
            DeployError::DeliveryInProgress {
                lock_path: "/srv/log/demo-abc123.log.lock".into(),
            },
            DeployError::UnsupportedContentType {
                content_type: "text/xml".to_string(),
            },
            DeployError::UnsupportedEvent {
                event: "issues".to_string(),
            },
        ];

        for err in errors {
            let status = err.http_status();
            assert_ne!(reason_phrase(status), "Internal Server Error", "status {status}");
        }
        assert_eq!(reason_phrase(409), "Conflict");
    }
}

mod exit_code_tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            CliError::InvalidProjects { count: 1 }.exit_code(),
            CliError::InvalidArgument {
                arg: "--query".to_string(),
                message: "bad".to_string(),
            }
            .exit_code(),
            CliError::Io(std::io::Error::other("boom")).exit_code(),
            CliError::Deploy(DeployError::UnsupportedEvent {
                event: "issues".to_string(),
            })
            .exit_code(),
        ];
        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
