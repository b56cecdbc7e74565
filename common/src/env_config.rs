use std::{env, sync::Arc};

use crate::plan::{BillingItems, PlanCatalog, PlanLimitsTable, WARN_USER_LIMIT};

#[derive(Clone, Debug)]
/// Configuration struct for the server.
///
/// This struct holds all the necessary configuration parameters
/// required to initialize and run the server.
/// It includes database and Redis connection details, JWT configuration,
/// server host and port, CORS settings, logging preferences and the
/// credentials of the billing, embedding and e-mail providers.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to.
    pub database_url: String,
    /// The URL of Redis server to connect to.
    pub redis_url: String,
    /// Configuration for JWT (JSON Web Token) authentication.
    pub jwt_config: JwtConfig,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// The allowed origin for CORS (Cross-Origin Resource Sharing).
    pub cors_allowed_origin: String,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// Stripe secret key
    pub stripe_secret_key: String,
    /// Stripe webhook secret
    pub stripe_webhook_secret: String,
    /// Plan limits and billing item ids.
    pub billing: BillingConfig,
    /// OpenAI API key used for embeddings and chat completions.
    pub openai_api_key: String,
    /// Resend API key for limit warning e-mails.
    pub resend_api_key: String,
    /// Sender address of outgoing e-mails.
    pub email_from: String,
}

#[derive(Clone, Debug)]
/// Configuration for JSON Web Token (JWT) authentication.
///
/// This struct contains the secret key used to sign JWTs and
/// the expiration time in hours for issued tokens.
pub struct JwtConfig {
    /// The secret key used to sign and verify JWTs.
    pub secret: String,
    /// The expiration time for JWTs in hours.
    pub expiration_hours: i64,
}

/// Immutable billing configuration shared by the reconciliation service and
/// the usage gate.
#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub limits: PlanLimitsTable,
    pub catalog: PlanCatalog,
    /// Usage fraction that triggers the near-limit warning.
    pub warn_threshold: f64,
    /// Base URL the hosted checkout redirects back to.
    pub redirect_base_url: String,
}

impl JwtConfig {
    /// Creates a new `JwtConfig` instance from environment variables.
    ///
    /// Reads the JWT configuration from environment variables:
    /// - `JWT_SECRET`: Required. The secret key for JWT signing.
    /// - `JWT_EXPIRATION_HOURS`: Optional. Defaults to 24 hours if not provided.
    ///
    /// # Panics
    ///
    /// This function will panic if:
    /// - `JWT_SECRET` environment variable is not set
    /// - `JWT_EXPIRATION_HOURS` is set but cannot be parsed as a valid number
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        JwtConfig {
            secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("JWT_EXPIRATION_HOURS must be a valid number"),
        }
    }
}

impl BillingConfig {
    /// Reads the per-plan item triplets `STRIPE_{PLAN}_{SUBSCRIPTION,PAGE,MSG}_ID`
    /// and `STRIPE_REDIRECT_BASE_URL`.
    ///
    /// # Panics
    ///
    /// Panics if any of the nine item ids is missing.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        BillingConfig {
            limits: PlanLimitsTable::default(),
            catalog: PlanCatalog {
                starter: billing_items_from_env("STARTER"),
                pro: billing_items_from_env("PRO"),
                enterprise: billing_items_from_env("ENTERPRISE"),
            },
            warn_threshold: WARN_USER_LIMIT,
            redirect_base_url: env::var("STRIPE_REDIRECT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }
}

fn billing_items_from_env(plan: &str) -> BillingItems {
    let var = |item: &str| {
        let key = format!("STRIPE_{plan}_{item}_ID");
        env::var(&key).unwrap_or_else(|_| panic!("{key} must be set"))
    };

    BillingItems {
        base: var("SUBSCRIPTION"),
        uploads: var("PAGE"),
        messages: var("MSG"),
    }
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `ENVIRONMENT`, `DATABASE_URL`, `REDIS_URL`
    /// - `JWT_SECRET`: Secret key for JWT signing (via `JwtConfig::from_env()`)
    /// - `STRIPE_{STARTER,PRO,ENTERPRISE}_{SUBSCRIPTION,PAGE,MSG}_ID` (via `BillingConfig::from_env()`)
    ///
    /// Optional (with defaults):
    /// - `IP`: Server host (default: "127.0.0.1")
    /// - `PORT`: Server port (default: 8080)
    /// - `WORKERS`: Number of worker threads (default: 4)
    /// - `CORS_ALLOWED_ORIGIN`: Allowed CORS origin (default: "http://localhost:3000")
    /// - `ENABLE_CONSOLE_LOGGING`: Whether to enable console logging (default: true)
    /// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `OPENAI_API_KEY`, `RESEND_API_KEY` (default: empty)
    /// - `EMAIL_FROM` (default: "Jarvas <noreply@jarvas.app>")
    ///
    /// # Panics
    ///
    /// This function will panic if required environment variables are missing or if
    /// numeric values cannot be parsed correctly.
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();

        Arc::new(Config {
            environment: env::var("ENVIRONMENT").expect("ENVIRONMENT must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            redis_url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            jwt_config: JwtConfig::from_env(),
            server_host: env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            num_workers: env::var("WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(4),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            console_logging_enabled: env::var("ENABLE_CONSOLE_LOGGING")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            billing: BillingConfig::from_env(),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Jarvas <noreply@jarvas.app>".to_string()),
        })
    }
}
