//! Publish password-reset mail events to the delivery queue.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Mail templates handled by the delivery worker.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Carries a single-use password-reset link.
    PasswordReset,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    name: Cow<'a, str>,
    template: Template,
    reset_url: Cow<'a, str>,
}

/// Mail queue client.
///
/// The default instance carries no connection; every publish through it
/// fails with a delivery error so the reset path can apply its
/// environment policy.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`] connected to the configured queue.
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address).map_err(|err| {
            ServerError::Configuration(format!("invalid mail address: {err}"))
        })?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme()).map_err(|_| {
                ServerError::Configuration(
                    "unsupported mail queue scheme".to_owned(),
                )
            })?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("clinica_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config)
            .await
            .map_err(|err| ServerError::Internal {
                details: "failed to connect to the mail queue".to_owned(),
                source: Some(Box::new(err)),
            })?;

        tracing::info!(%addr, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn
            .create_channel()
            .await
            .map_err(|_| ServerError::MailDelivery)?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| ServerError::MailDelivery)?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "clinica.email",
            source: "clinica.api",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish a password-reset event carrying the one-time link.
    pub async fn publish_reset(
        &self,
        email: &str,
        name: &str,
        reset_url: &str,
    ) -> Result<()> {
        let Some(conn) = &self.conn else {
            tracing::debug!(template = ?Template::PasswordReset, "no mail transport configured");
            return Err(ServerError::MailDelivery);
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let content = Content {
            to: Cow::from(email),
            name: Cow::from(name),
            template: Template::PasswordReset,
            reset_url: Cow::from(reset_url),
        };
        let payload = Self::create_event(content);
        let payload = serde_json::to_string(&payload).map_err(|err| {
            ServerError::Internal {
                details: "failed to serialize mail event".to_owned(),
                source: Some(Box::new(err)),
            }
        })?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(|_| ServerError::MailDelivery)?;

        tracing::trace!(to = email, "password reset event published");

        Ok(())
    }
}
