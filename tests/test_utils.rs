#![allow(dead_code)]

use chatter_server::{
    captcha::MemoryChallengeStore,
    companion::ReplyBackend,
    config::{
        AiConfig, CaptchaConfig, Config, DbConfig, Environment, LoggingConfig, MailConfig,
        TokenConfig,
    },
    context::AppContext,
    db::MemoryAccountStore,
    mailer::{EmailKind, LogMailer},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub context: Arc<AppContext>,
    pub store: Arc<MemoryAccountStore>,
    pub mailer: Arc<LogMailer>,
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/chatter_test".to_string(),
        redis_url: None,
        jwt_secret: "Zr7Qx2Lm9Vb4Nc8Wd1Ke6Tf3Hg5Js0Ap".to_string(),
        jwt_issuer: "chatter-server".to_string(),
        port: 0,
        environment: Environment::Development,
        client_url: "http://localhost:5173".to_string(),
        bcrypt_cost: 4,
        onboarding_delay_ms: 0,
        rust_log: "warn".to_string(),
        tokens: TokenConfig {
            session_ttl_days: 7,
            verification_ttl_hours: 24,
            reset_ttl_minutes: 60,
        },
        captcha: CaptchaConfig {
            ttl_secs: 300,
            length: 5,
        },
        ai: AiConfig {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
        },
        mail: MailConfig {
            brevo_api_key: None,
            sender_email: None,
            sender_name: "Chatter".to_string(),
        },
        db: DbConfig {
            max_connections: 1,
            acquire_timeout_secs: 1,
        },
        logging: LoggingConfig {
            enable_user_identifiers: false,
            hash_salt: "test-salt".to_string(),
        },
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_backend(None).await
}

/// Starts the full HTTP app on an ephemeral port over in-memory backends.
pub async fn spawn_app_with_backend(backend: Option<Arc<dyn ReplyBackend>>) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(MemoryAccountStore::new());
    let mailer = Arc::new(LogMailer::new());
    let context = Arc::new(
        AppContext::new(
            test_config(),
            store.clone(),
            Arc::new(MemoryChallengeStore::new()),
            mailer.clone(),
            backend,
        )
        .expect("Failed to build app context"),
    );
    context
        .companion
        .ensure_bot()
        .await
        .expect("Failed to create companion bot");

    tokio::spawn(chatter_server::serve(
        listener,
        context.clone(),
        std::future::pending(),
    ));

    TestApp {
        address,
        client: reqwest::Client::new(),
        context,
        store,
        mailer,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_authed(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn put_authed(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Signs up with a pre-solved captcha and returns the response body.
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Value {
        let resp = self
            .post(
                "/api/auth/signup",
                json!({
                    "name": name,
                    "password": password,
                    "fullName": format!("{} Example", name),
                    "email": email,
                    "captchaCompleted": true,
                }),
            )
            .await;
        assert_eq!(resp.status().as_u16(), 201, "signup failed for {}", name);
        resp.json().await.unwrap()
    }

    /// Token from the link in the most recent email of `kind`.
    pub fn token_from_outbox(&self, kind: EmailKind) -> String {
        let email = self
            .mailer
            .sent()
            .into_iter()
            .rev()
            .find(|e| e.kind == kind)
            .expect("no email of the requested kind");
        let start = email.text.find("token=").expect("email without token link") + "token=".len();
        email.text[start..]
            .split_whitespace()
            .next()
            .unwrap()
            .to_string()
    }
}

/// Reads the `error` field of a JSON error response.
pub async fn error_message(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}
