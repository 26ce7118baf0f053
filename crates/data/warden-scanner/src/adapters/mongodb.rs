//! MongoDB scanner
//!
//! MongoDB has no settings table worth auditing remotely, so `scan_config`
//! keeps the default `NotSupported`.

use ::mongodb::error::{Error as MongoError, ErrorKind};
use ::mongodb::options::ClientOptions;
use ::mongodb::Client;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use std::time::Duration;

use crate::{with_timeout, Credential, Scanner};
use warden_core::{Backend, Result, ScanError};

const MECHANISMS: &[&str] = &["SCRAM-SHA-1", "SCRAM-SHA-256"];

/// Roles that grant effective control over the deployment
const PRIVILEGED_ROLES: &[&str] = &["root", "__system", "userAdminAnyDatabase", "dbOwner"];

/// `Unauthorized`
const UNAUTHORIZED: i32 = 13;

pub struct MongoScanner {
    client: Option<Client>,
}

impl MongoScanner {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let mut options = with_timeout(timeout, "mongodb connect", async {
            ClientOptions::parse(url)
                .await
                .map_err(|e| map_error("parse url", e))
        })
        .await?;
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options).map_err(|e| map_error("connect", e))?;
        Ok(Self {
            client: Some(client),
        })
    }

    async fn admin_command(&self, context: &str, command: Document) -> Result<Document> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ScanError::Connection("connection already closed".into()))?;
        client
            .database("admin")
            .run_command(command)
            .await
            .map_err(|e| map_error(context, e))
    }
}

fn map_error(context: &str, e: MongoError) -> ScanError {
    match e.kind.as_ref() {
        ErrorKind::Command(c) if c.code == UNAUTHORIZED => {
            ScanError::Permission(format!("{}: {}", context, e))
        }
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::InvalidArgument { .. }
        | ErrorKind::Authentication { .. } => ScanError::Connection(format!("{}: {}", context, e)),
        _ => ScanError::Query(format!("{}: {}", context, e)),
    }
}

/// One credential per SCRAM mechanism stored for a `usersInfo` entry
pub(crate) fn credentials_from_user(user: &Document) -> Vec<Credential> {
    let Ok(username) = user.get_str("user") else {
        return Vec::new();
    };

    let privileged = user
        .get_array("roles")
        .map(|roles| {
            roles.iter().any(|role| match role {
                Bson::Document(d) => d
                    .get_str("role")
                    .map(|r| PRIVILEGED_ROLES.contains(&r))
                    .unwrap_or(false),
                _ => false,
            })
        })
        .unwrap_or(false);

    let Ok(credentials) = user.get_document("credentials") else {
        return Vec::new();
    };

    MECHANISMS
        .iter()
        .filter_map(|mechanism| {
            let cred = credentials.get_document(mechanism).ok()?;
            let iterations = match cred.get("iterationCount")? {
                Bson::Int32(n) => i64::from(*n),
                Bson::Int64(n) => *n,
                _ => return None,
            };
            let encoded = format!(
                "{}${}:{}${}:{}",
                mechanism,
                iterations,
                cred.get_str("salt").ok()?,
                cred.get_str("storedKey").ok()?,
                cred.get_str("serverKey").ok()?,
            );
            Some(Credential::new(username, privileged, encoded))
        })
        .collect()
}

#[async_trait]
impl Scanner for MongoScanner {
    fn backend(&self) -> Backend {
        Backend::MongoDb
    }

    async fn ping(&self) -> Result<()> {
        self.admin_command("ping", doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn check_permissions(&self) -> Result<()> {
        self.admin_command("buildInfo", doc! { "buildInfo": 1 }).await?;
        self.admin_command(
            "usersInfo",
            doc! { "usersInfo": { "forAllDBs": true }, "showCredentials": true },
        )
        .await?;
        Ok(())
    }

    async fn get_users(&self) -> Result<Vec<Credential>> {
        let reply = self
            .admin_command(
                "usersInfo",
                doc! { "usersInfo": { "forAllDBs": true }, "showCredentials": true },
            )
            .await?;
        let users = reply
            .get_array("users")
            .map_err(|e| ScanError::Query(format!("usersInfo reply: {}", e)))?;

        Ok(users
            .iter()
            .filter_map(|u| match u {
                Bson::Document(d) => Some(credentials_from_user(d)),
                _ => None,
            })
            .flatten()
            .collect())
    }

    async fn get_version(&self) -> Result<String> {
        let reply = self.admin_command("buildInfo", doc! { "buildInfo": 1 }).await?;
        reply
            .get_str("version")
            .map(str::to_string)
            .map_err(|e| ScanError::Query(format!("buildInfo reply: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_doc() -> Document {
        doc! {
            "_id": "admin.admin",
            "user": "admin",
            "db": "admin",
            "roles": [ { "role": "root", "db": "admin" } ],
            "credentials": {
                "SCRAM-SHA-1": {
                    "iterationCount": 10000,
                    "salt": "bW9uZ29zYWx0dmFsdWUxMg==",
                    "storedKey": "REkFIRL38Df06b59LxclJ0ilEtw=",
                    "serverKey": "6DE7BM/XYxGM5yWhZrv2RdzZU90=",
                },
                "SCRAM-SHA-256": {
                    "iterationCount": 15000,
                    "salt": "bW9uZ29zaGEyNTZzYWx0IXNhbHQxMjM0",
                    "storedKey": "olxv3w5U72BFz9L/wPBe763Uj5BORPX1OOkh48P+Mt8=",
                    "serverKey": "gW3I3qByBSxoRGsWFAx7ko1LYCkOZQ9/2Rof7ZOaZLs=",
                },
            },
        }
    }

    #[test]
    fn test_credentials_per_mechanism() {
        let creds = credentials_from_user(&user_doc());
        assert_eq!(creds.len(), 2);
        assert!(creds.iter().all(|c| c.username == "admin" && c.privileged));
        assert!(creds[0].hash.starts_with("SCRAM-SHA-1$10000:"));
        assert!(creds.iter().all(|c| c.verify("hunter2")));
    }

    #[test]
    fn test_user_without_credentials() {
        let user = doc! { "user": "x509user", "db": "$external", "roles": [] };
        assert!(credentials_from_user(&user).is_empty());
    }
}
