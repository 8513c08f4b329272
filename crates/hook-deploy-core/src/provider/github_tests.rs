//! Tests for GitHub signature verification.

use super::*;

const BODY: &[u8] = br#"{"ref":"refs/heads/main"}"#;
const SHA1_DIGEST: &str = "9e9224e1fe730b87754d941cabe9da2f2724b16c";
const SHA256_DIGEST: &str = "232a5e067b6a5aa567ed5a1d21a0dffaf6ef0eeecb6bd9bcf43b3d5ef3fc4f43";

fn secret() -> WebhookSecret {
    WebhookSecret::new("s3cret")
}

fn headers_with(name: &str, value: &str) -> HeaderMap {
    [(name, value)].into_iter().collect()
}

mod algorithm_tests {
    use super::*;

    #[test]
    fn test_parses_known_algorithms_case_insensitively() {
        assert_eq!("sha1".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha1);
        assert_eq!(
            "SHA256".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::Sha256
        );
        assert_eq!(
            "sha512".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::Sha512
        );
    }

    #[test]
    fn test_unknown_algorithm_is_auth_error() {
        let err = "md5".parse::<SignatureAlgorithm>().unwrap_err();
        assert!(
            matches!(err, DeployError::Auth { ref message } if message.contains("md5")),
            "expected Auth error naming the algorithm, got: {err:?}"
        );
    }
}

mod authenticate_tests {
    use super::*;

    #[test]
    fn test_valid_sha1_signature_passes() {
        let headers = headers_with(SIGNATURE_HEADER, &format!("sha1={SHA1_DIGEST}"));
        assert!(authenticate(&secret(), &headers, BODY).is_ok());
    }

    #[test]
    fn test_valid_sha256_signature_passes() {
        let headers = headers_with(SIGNATURE_HEADER, &format!("sha256={SHA256_DIGEST}"));
        assert!(authenticate(&secret(), &headers, BODY).is_ok());
    }

    /// Deliveries that only carry the newer header are still accepted.
    #[test]
    fn test_falls_back_to_sha256_header() {
        let headers = headers_with(SIGNATURE_256_HEADER, &format!("sha256={SHA256_DIGEST}"));
        assert!(authenticate(&secret(), &headers, BODY).is_ok());
    }

    #[test]
    fn test_signature_header_name_is_case_insensitive() {
        let headers = headers_with("x-hub-signature", &format!("sha1={SHA1_DIGEST}"));
        assert!(authenticate(&secret(), &headers, BODY).is_ok());
    }

    #[test]
    fn test_tampered_body_fails() {
        let headers = headers_with(SIGNATURE_HEADER, &format!("sha1={SHA1_DIGEST}"));
        let err = authenticate(&secret(), &headers, br#"{"ref":"refs/heads/evil"}"#).unwrap_err();
        assert!(matches!(err, DeployError::Auth { .. }));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let headers = headers_with(SIGNATURE_HEADER, &format!("sha1={SHA1_DIGEST}"));
        let err = authenticate(&WebhookSecret::new("other"), &headers, BODY).unwrap_err();
        assert!(matches!(err, DeployError::Auth { .. }));
    }

    #[test]
    fn test_missing_signature_header_fails() {
        let err = authenticate(&secret(), &HeaderMap::new(), BODY).unwrap_err();
        assert!(
            matches!(err, DeployError::Auth { ref message } if message.contains(SIGNATURE_HEADER)),
            "expected Auth error naming the header, got: {err:?}"
        );
    }

    #[test]
    fn test_signature_without_algorithm_fails() {
        let headers = headers_with(SIGNATURE_HEADER, SHA1_DIGEST);
        let err = authenticate(&secret(), &headers, BODY).unwrap_err();
        assert!(matches!(err, DeployError::Auth { .. }));
    }

    #[test]
    fn test_unsupported_algorithm_fails() {
        let headers = headers_with(SIGNATURE_HEADER, &format!("md5={SHA1_DIGEST}"));
        let err = authenticate(&secret(), &headers, BODY).unwrap_err();
        assert!(matches!(err, DeployError::Auth { .. }));
    }

    #[test]
    fn test_non_hex_digest_fails() {
        let headers = headers_with(SIGNATURE_HEADER, "sha1=not-hex");
        let err = authenticate(&secret(), &headers, BODY).unwrap_err();
        assert!(matches!(err, DeployError::Auth { .. }));
    }

    /// A digest of the right algorithm but wrong length must not panic or pass.
    #[test]
    fn test_truncated_digest_fails() {
        let headers = headers_with(SIGNATURE_HEADER, &format!("sha1={}", &SHA1_DIGEST[..20]));
        let err = authenticate(&secret(), &headers, BODY).unwrap_err();
        assert!(matches!(err, DeployError::Auth { .. }));
    }

    #[test]
    fn test_error_message_never_contains_secret() {
        let headers = headers_with(SIGNATURE_HEADER, "sha1=00");
        let err = authenticate(&secret(), &headers, BODY).unwrap_err();
        assert!(!err.to_string().contains("s3cret"));
    }
}

mod verify_hmac_tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let secret = WebhookSecret::new("key");
        let result = verify_hmac(
            SignatureAlgorithm::Sha1,
            &secret,
            b"The quick brown fox jumps over the lazy dog",
            "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_uppercase_hex_digest_is_accepted() {
        let result = verify_hmac(
            SignatureAlgorithm::Sha1,
            &secret(),
            BODY,
            &SHA1_DIGEST.to_ascii_uppercase(),
        );
        assert!(result.is_ok());
    }
}
