//! Anonymous usage telemetry
//!
//! One event per command: the command name, the slugs involved and the
//! target agents. Events are posted on a background task with a short
//! timeout, and every failure is swallowed. Setting `DO_NOT_TRACK` or
//! `DOCSKILLS_TELEMETRY_DISABLED` turns telemetry off entirely.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::agents::Agent;
use crate::config::Settings;

/// Timeout for a single telemetry request
pub const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(3);

/// Body posted to the telemetry endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,

    pub version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<bool>,
}

impl TelemetryEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            skills: None,
            agents: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            ci: None,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let skills: Vec<String> = skills.into_iter().map(Into::into).collect();
        self.skills = (!skills.is_empty()).then_some(skills);
        self
    }

    pub fn with_agents(mut self, agents: &[Agent]) -> Self {
        let agents: Vec<String> = agents.iter().map(|a| a.id().to_string()).collect();
        self.agents = (!agents.is_empty()).then_some(agents);
        self
    }
}

struct Reporter {
    client: reqwest::Client,
    url: String,
    ci: bool,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Fire-and-forget event reporter
#[derive(Clone, Default)]
pub struct Telemetry {
    reporter: Option<Arc<Reporter>>,
}

impl Telemetry {
    /// Reporter for the configured endpoint, disabled on opt-out
    pub fn from_settings(settings: &Settings) -> Self {
        if !settings.telemetry_enabled {
            tracing::debug!("Telemetry disabled by environment");
            return Self::disabled();
        }

        let client = match reqwest::Client::builder()
            .user_agent(concat!("docskills/", env!("CARGO_PKG_VERSION")))
            .timeout(TELEMETRY_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!("Telemetry client unavailable: {}", e);
                return Self::disabled();
            }
        };

        Self {
            reporter: Some(Arc::new(Reporter {
                client,
                url: settings.telemetry_url.clone(),
                ci: settings.ci,
                pending: Mutex::new(Vec::new()),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { reporter: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.reporter.is_some()
    }

    /// Queue an event; returns immediately
    pub fn track(&self, mut event: TelemetryEvent) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        if reporter.ci {
            event.ci = Some(true);
        }

        let client = reporter.client.clone();
        let url = reporter.url.clone();
        let handle = runtime.spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(response) => {
                    tracing::debug!(event = %event.event, status = %response.status(), "telemetry sent")
                }
                Err(e) => tracing::debug!(event = %event.event, "telemetry dropped: {}", e),
            }
        });

        if let Ok(mut pending) = reporter.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Give in-flight events up to `grace` to finish
    pub async fn flush(&self, grace: Duration) {
        let Some(reporter) = &self.reporter else {
            return;
        };

        let handles: Vec<JoinHandle<()>> = match reporter.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }

        let _ = tokio::time::timeout(grace, futures::future::join_all(handles)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn settings(url: String, enabled: bool, ci: bool) -> Settings {
        Settings {
            telemetry_url: url,
            telemetry_enabled: enabled,
            ci,
            ..Settings::from_lookup(|_| None)
        }
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let event = TelemetryEvent::new("list").with_skills(Vec::<String>::new());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "list");
        assert!(json.get("skills").is_none());
        assert!(json.get("agents").is_none());
        assert!(json.get("ci").is_none());
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_track_posts_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/telemetry")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "event": "install",
                "skills": ["react"],
                "agents": ["claude"],
                "ci": true
            })))
            .with_status(204)
            .create_async()
            .await;

        let telemetry = Telemetry::from_settings(&settings(
            format!("{}/telemetry", server.url()),
            true,
            true,
        ));
        telemetry.track(
            TelemetryEvent::new("install")
                .with_skills(["react"])
                .with_agents(&[Agent::Claude]),
        );
        telemetry.flush(Duration::from_secs(5)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_opt_out_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/telemetry")
            .expect(0)
            .create_async()
            .await;

        let telemetry = Telemetry::from_settings(&settings(
            format!("{}/telemetry", server.url()),
            false,
            false,
        ));
        assert!(!telemetry.is_enabled());
        telemetry.track(TelemetryEvent::new("install"));
        telemetry.flush(Duration::from_secs(1)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_silent() {
        let telemetry = Telemetry::from_settings(&settings(
            "http://127.0.0.1:1/telemetry".to_string(),
            true,
            false,
        ));
        telemetry.track(TelemetryEvent::new("remove").with_skills(["react"]));
        telemetry.flush(Duration::from_secs(5)).await;
    }

    #[test]
    fn test_track_outside_runtime_is_a_no_op() {
        let telemetry = Telemetry::from_settings(&settings(
            "http://127.0.0.1:1/telemetry".to_string(),
            true,
            false,
        ));
        telemetry.track(TelemetryEvent::new("list"));
    }
}
