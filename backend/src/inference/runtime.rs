use super::InferenceError;
use super::prompt::ChatPrompt;
use crate::config::ModelConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Backoff,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Unloaded => "unloaded",
            ModelStatus::Loading => "loading",
            ModelStatus::Ready => "ready",
            ModelStatus::Backoff => "backoff",
        }
    }
}

/// A vision-language model that turns a chat prompt into a text completion.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, InferenceError>;

    fn status(&self) -> ModelStatus;

    /// Starts loading the model ahead of the first request.
    fn warm_up(&self) {}
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletion {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

/// A running llama.cpp server with the model and projector loaded.
struct LlamaServer {
    child: Mutex<Child>,
    base_url: String,
}

impl LlamaServer {
    fn is_running(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(child.try_wait(), Ok(None))
    }

    async fn start(settings: &ModelConfig, http: &reqwest::Client) -> Result<Self, InferenceError> {
        let port = match settings.server_port {
            Some(port) => port,
            None => free_port()?,
        };

        let mut child = Command::new(&settings.server_binary)
            .arg("-m")
            .arg(&settings.base_model_path)
            .arg("--mmproj")
            .arg(&settings.projector_path)
            .arg("-c")
            .arg(settings.context_size.to_string())
            .arg("-ngl")
            .arg(settings.gpu_layers.to_string())
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    InferenceError::Unavailable(format!(
                        "inference runtime {} not found",
                        settings.server_binary
                    ))
                } else {
                    InferenceError::Unavailable(format!(
                        "failed to start {}: {}",
                        settings.server_binary, e
                    ))
                }
            })?;

        let base_url = format!("http://127.0.0.1:{}", port);
        await_ready(
            &mut child,
            &base_url,
            http,
            &settings.server_binary,
            settings.startup_timeout(),
        )
        .await
        .map_err(|e| match e {
            InferenceError::Unavailable(reason) => InferenceError::Unavailable(format!(
                "{}: {}",
                settings.base_model_path.display(),
                reason
            )),
            other => other,
        })?;

        Ok(Self {
            child: Mutex::new(child),
            base_url,
        })
    }
}

/// Polls the server's `/health` until it answers, the child exits, or `budget` runs out.
async fn await_ready(
    child: &mut Child,
    base_url: &str,
    http: &reqwest::Client,
    binary: &str,
    budget: Duration,
) -> Result<(), InferenceError> {
    let poll = async {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(InferenceError::Unavailable(format!(
                        "{} exited while loading ({})",
                        binary, status
                    )));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(InferenceError::Unavailable(format!(
                        "lost track of {}: {}",
                        binary, e
                    )));
                }
            }

            let health = http
                .get(format!("{}/health", base_url))
                .timeout(HEALTH_REQUEST_TIMEOUT)
                .send()
                .await;
            if let Ok(response) = health {
                if response.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(budget, poll).await.unwrap_or_else(|_| {
        Err(InferenceError::Unavailable(format!(
            "{} was not ready within {:?}",
            binary, budget
        )))
    })
}

fn free_port() -> Result<u16, InferenceError> {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .map_err(|e| InferenceError::Unavailable(format!("no free port for the model server: {}", e)))
}

enum LoadState {
    Idle,
    Loading { failures: u32 },
    Ready(Arc<LlamaServer>),
    Failed {
        failures: u32,
        retry_at: Instant,
        reason: String,
    },
}

/// Delay before load attempt `failures + 1`: base, 2x base, 4x base, ... capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Serves completions from a llama.cpp server child process.
///
/// The server is started at most once and shared by every request. Requests
/// never wait for a load: while the model is loading, or while a failed load
/// is backing off, `complete` reports `Unavailable` straight away.
pub struct LlamaServerBackend {
    settings: ModelConfig,
    http: reqwest::Client,
    state: Arc<Mutex<LoadState>>,
}

impl LlamaServerBackend {
    pub fn new(settings: ModelConfig, http: reqwest::Client) -> Self {
        Self {
            settings,
            http,
            state: Arc::new(Mutex::new(LoadState::Idle)),
        }
    }

    fn check_artifacts(&self) -> Result<(), InferenceError> {
        for (label, path) in [
            ("base model", &self.settings.base_model_path),
            ("vision projector", &self.settings.projector_path),
        ] {
            if !path.is_file() {
                return Err(InferenceError::Unavailable(format!(
                    "{} not found at {}",
                    label,
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn acquire(&self) -> Result<Arc<LlamaServer>, InferenceError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let failures = match &*state {
            LoadState::Ready(server) => {
                if server.is_running() {
                    return Ok(server.clone());
                }
                log::warn!("Model server exited; reloading");
                0
            }
            LoadState::Loading { .. } => {
                return Err(InferenceError::Unavailable("model is still loading".to_string()));
            }
            LoadState::Failed {
                failures,
                retry_at,
                reason,
            } => {
                let now = Instant::now();
                if now < *retry_at {
                    return Err(InferenceError::Unavailable(format!(
                        "{} (load failed {} time(s), next attempt in {}s)",
                        reason,
                        failures,
                        retry_at.duration_since(now).as_secs()
                    )));
                }
                *failures
            }
            LoadState::Idle => 0,
        };

        if let Err(e) = self.check_artifacts() {
            let failures = failures + 1;
            let delay = backoff_delay(self.settings.backoff_base(), self.settings.backoff_max(), failures);
            log::warn!("{} (retrying in {:?})", e, delay);
            *state = LoadState::Failed {
                failures,
                retry_at: Instant::now() + delay,
                reason: e.to_string(),
            };
            return Err(e);
        }

        *state = LoadState::Loading { failures };
        drop(state);
        self.spawn_load(failures);
        Err(InferenceError::Unavailable("model load started".to_string()))
    }

    fn spawn_load(&self, previous_failures: u32) {
        let settings = self.settings.clone();
        let http = self.http.clone();
        let state = self.state.clone();

        log::info!(
            "Loading model {} with projector {}",
            settings.base_model_path.display(),
            settings.projector_path.display()
        );

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = LlamaServer::start(&settings, &http).await;
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                Ok(server) => {
                    log::info!(
                        "Model ready at {} after {:?}",
                        server.base_url,
                        started.elapsed()
                    );
                    *state = LoadState::Ready(Arc::new(server));
                }
                Err(e) => {
                    let failures = previous_failures + 1;
                    let delay =
                        backoff_delay(settings.backoff_base(), settings.backoff_max(), failures);
                    log::error!(
                        "Model load failed after {:?}: {} (retrying in {:?})",
                        started.elapsed(),
                        e,
                        delay
                    );
                    *state = LoadState::Failed {
                        failures,
                        retry_at: Instant::now() + delay,
                        reason: e.to_string(),
                    };
                }
            }
        });
    }
}

#[async_trait]
impl VisionBackend for LlamaServerBackend {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, InferenceError> {
        let server = self.acquire()?;
        let started = Instant::now();
        let failed = |reason: String| InferenceError::Invocation {
            reason,
            elapsed: started.elapsed(),
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", server.base_url))
            .json(prompt)
            .send()
            .await
            .map_err(|e| failed(format!("model server request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::debug!("Model server error body: {}", body);
            return Err(failed(format!("model server returned {}", status)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable completion: {}", e)))?;
        completion.into_text().ok_or_else(|| {
            InferenceError::MalformedOutput("completion carried no message content".to_string())
        })
    }

    fn status(&self) -> ModelStatus {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            LoadState::Idle => ModelStatus::Unloaded,
            LoadState::Loading { .. } => ModelStatus::Loading,
            LoadState::Ready(_) => ModelStatus::Ready,
            LoadState::Failed { .. } => ModelStatus::Backoff,
        }
    }

    fn warm_up(&self) {
        match self.acquire() {
            Ok(_) => {}
            Err(e) => log::info!("Model warm-up: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn missing_artifacts() -> ModelConfig {
        ModelConfig {
            base_model_path: PathBuf::from("/nonexistent/ggml-model-q4_k.gguf"),
            projector_path: PathBuf::from("/nonexistent/mmproj-model-f16.gguf"),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(base, max, 7), Duration::from_secs(300));
        assert_eq!(backoff_delay(base, max, u32::MAX), Duration::from_secs(300));
    }

    #[actix_web::test]
    async fn missing_artifacts_are_unavailable_and_cached() {
        let backend = LlamaServerBackend::new(missing_artifacts(), reqwest::Client::new());
        assert_eq!(backend.status(), ModelStatus::Unloaded);

        let prompt = ChatPrompt::for_image("data:image/png;base64,AAAA".into(), 16);
        match backend.complete(&prompt).await {
            Err(InferenceError::Unavailable(reason)) => assert!(reason.contains("base model")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert_eq!(backend.status(), ModelStatus::Backoff);

        match backend.complete(&prompt).await {
            Err(InferenceError::Unavailable(reason)) => {
                assert!(reason.contains("load failed 1 time(s)"))
            }
            other => panic!("expected cached Unavailable, got {:?}", other),
        }
    }

    #[actix_web::test]
    async fn missing_runtime_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("model.gguf");
        let projector = dir.path().join("mmproj.gguf");
        std::fs::write(&base, b"gguf").unwrap();
        std::fs::write(&projector, b"gguf").unwrap();

        let settings = ModelConfig {
            base_model_path: base,
            projector_path: projector,
            server_binary: "/nonexistent/bin/llama-server".to_string(),
            ..ModelConfig::default()
        };
        let result = LlamaServer::start(&settings, &reqwest::Client::new()).await;
        match result {
            Err(InferenceError::Unavailable(reason)) => assert!(reason.contains("not found")),
            Err(other) => panic!("expected Unavailable, got {:?}", other),
            Ok(_) => panic!("expected the runtime to be missing"),
        }
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn silent_server_gives_up_at_startup_budget() {
        // Accepts connections through the backlog but never answers them.
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            await_ready(
                &mut child,
                &base_url,
                &reqwest::Client::new(),
                "llama-server",
                Duration::from_secs(1),
            ),
        )
        .await
        .expect("startup budget was not enforced");

        match outcome {
            Err(InferenceError::Unavailable(reason)) => assert!(reason.contains("not ready within")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn completion_text_comes_from_first_choice() {
        let completion: ChatCompletion = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}]}"#,
        )
        .unwrap();
        assert_eq!(completion.into_text().as_deref(), Some("{\"a\":1}"));

        let empty: ChatCompletion = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(empty.into_text().is_none());
    }
}
