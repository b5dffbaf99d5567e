//! VERIFY stage: ask the live site whether it answers.
//!
//! A failed check marks the run as failed but never touches what was
//! published.

use crate::{config::PipelineConfig, log, pipeline::StageError};
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;

/// Request every configured path of the live site.
///
/// Returns the checked URLs. The first failing path ends the check.
pub fn verify(config: &PipelineConfig) -> Result<Vec<String>> {
    let urls: Vec<String> = config
        .verify
        .paths
        .iter()
        .filter_map(|path| config.site.join(path))
        .collect();
    if urls.is_empty() {
        anyhow::bail!("[site.url] is not set, nothing to verify");
    }

    let client = client(config.verify.timeout())?;
    for url in &urls {
        check(&client, url, config.verify.expect_status)?;
    }
    Ok(urls)
}

fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("blogship/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// One GET; redirects are followed.
fn check(client: &Client, url: &str, expected: u16) -> Result<(), StageError> {
    let response = client.get(url).send().map_err(|err| StageError::Network {
        url: url.to_owned(),
        reason: err.to_string(),
    })?;

    let status = response.status().as_u16();
    if status != expected {
        return Err(StageError::HealthCheck {
            url: url.to_owned(),
            status,
            expected,
        });
    }
    log!("verify"; "{url} answered {status}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tiny_http::{Response, Server};

    /// Serve `requests` requests: `/missing` gets a 404, anything else a 200.
    fn serve(requests: usize) -> (String, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = thread::spawn(move || {
            for request in server.incoming_requests().take(requests) {
                let status: u16 = if request.url() == "/missing" { 404 } else { 200 };
                request
                    .respond(Response::from_string("ok").with_status_code(status))
                    .unwrap();
            }
        });
        (format!("http://{addr}"), handle)
    }

    fn config(url: &str, paths: &[&str]) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.site.url = Some(url.to_owned());
        config.verify.paths = paths.iter().map(|p| (*p).to_owned()).collect();
        config.verify.timeout_secs = 5;
        config
    }

    #[test]
    fn test_live_site_answers_200() {
        let (url, handle) = serve(2);
        let checked = verify(&config(&url, &["/", "/foo/"])).unwrap();
        assert_eq!(checked, vec![format!("{url}/"), format!("{url}/foo/")]);
        handle.join().unwrap();
    }

    #[test]
    fn test_wrong_status_is_health_check_error() {
        let (url, handle) = serve(1);
        let err = verify(&config(&url, &["/missing"])).unwrap_err();
        match err.downcast_ref::<StageError>() {
            Some(StageError::HealthCheck {
                status, expected, ..
            }) => {
                assert_eq!(*status, 404);
                assert_eq!(*expected, 200);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_unreachable_is_network_error() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = verify(&config(&format!("http://127.0.0.1:{port}"), &["/"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::Network { .. })
        ));
    }

    #[test]
    fn test_requires_site_url() {
        let config = PipelineConfig::default();
        assert!(verify(&config).is_err());
    }
}
