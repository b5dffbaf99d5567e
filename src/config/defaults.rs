//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

// ============================================================================
// Common Defaults
// ============================================================================

pub fn r#true() -> bool {
    true
}

pub fn r#false() -> bool {
    false
}

// ============================================================================
// [site] Section Defaults
// ============================================================================

pub mod site {
    pub fn url() -> Option<String> {
        None
    }
}

// ============================================================================
// [build] Section Defaults
// ============================================================================

pub mod build {
    use std::path::PathBuf;

    pub fn root() -> Option<PathBuf> {
        None
    }

    pub fn content() -> PathBuf {
        "content".into()
    }

    pub fn output() -> PathBuf {
        "public".into()
    }

    pub fn install() -> Vec<String> {
        vec!["npm".into(), "ci".into()]
    }

    pub fn command() -> Vec<String> {
        vec!["npm".into(), "run".into(), "build".into()]
    }
}

// ============================================================================
// [pipeline] Section Defaults
// ============================================================================

pub mod pipeline {
    use std::path::PathBuf;

    pub fn branch() -> String {
        "main".into()
    }

    pub fn group() -> String {
        "pages".into()
    }

    pub fn state() -> PathBuf {
        ".blogship".into()
    }

    pub fn keep_artifacts() -> usize {
        5
    }
}

// ============================================================================
// [deploy] Section Defaults
// ============================================================================

pub mod deploy {
    pub mod pages {
        pub fn branch() -> String {
            "gh-pages".into()
        }

        pub fn token_env() -> String {
            "GITHUB_TOKEN".into()
        }

        pub fn committer_name() -> String {
            "blogship".into()
        }

        pub fn committer_email() -> String {
            "blogship@users.noreply.github.com".into()
        }
    }

    pub mod s3 {
        pub fn region() -> String {
            "us-east-1".into()
        }

        pub fn access_key_env() -> String {
            "AWS_ACCESS_KEY_ID".into()
        }

        pub fn secret_key_env() -> String {
            "AWS_SECRET_ACCESS_KEY".into()
        }
    }
}

// ============================================================================
// [verify] Section Defaults
// ============================================================================

pub mod verify {
    pub fn paths() -> Vec<String> {
        vec!["/".into()]
    }

    pub fn expect_status() -> u16 {
        200
    }

    pub fn timeout_secs() -> u64 {
        30
    }
}
