//! QWC command implementation.
//!
//! The Web Connector registers an application by importing a `.qwc` file:
//! a small XML document naming the SOAP endpoint, the user name to log in
//! with and how often to run.

use clap::ValueEnum;
use qbsync_protocol::{CodecResult, XmlElement};
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Path of the SOAP endpoint below the server URL.
pub const ENDPOINT_PATH: &str = "/qbwc";

/// Deployment profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Local server, frequent runs.
    Development,
    /// Shared test server.
    Sandbox,
    /// Live server, hourly runs.
    Production,
}

impl Profile {
    fn suffix(self) -> &'static str {
        match self {
            Profile::Development => "Dev",
            Profile::Sandbox => "Sandbox",
            Profile::Production => "",
        }
    }

    /// Minutes between scheduled runs.
    pub fn interval_minutes(self) -> u32 {
        match self {
            Profile::Development => 5,
            Profile::Sandbox => 10,
            Profile::Production => 60,
        }
    }

    /// Default server URL.
    pub fn server_url(self) -> &'static str {
        match self {
            Profile::Development => "http://localhost:3001",
            Profile::Sandbox => "https://sandbox.qbsync.local",
            Profile::Production => "https://qbsync.example.com",
        }
    }

    /// Default Web Connector user name.
    pub fn username(self) -> &'static str {
        match self {
            Profile::Development => "qbsync_dev",
            Profile::Sandbox => "qbsync_sandbox",
            Profile::Production => "qbsync",
        }
    }
}

/// Contents of a `.qwc` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QwcConfig {
    /// Name shown in the Web Connector's application list.
    pub app_name: String,
    /// Application identifier.
    pub app_id: String,
    /// Base URL of the sync server.
    pub server_url: String,
    /// Free-form description.
    pub description: String,
    /// Support page URL.
    pub support_url: String,
    /// User name the Web Connector authenticates with.
    pub username: String,
    /// Owner GUID, stable per installation.
    pub owner_id: String,
    /// Company file GUID.
    pub file_id: String,
    /// Minutes between scheduled runs.
    pub interval_minutes: u32,
    /// Whether the application only reads from QuickBooks.
    pub read_only: bool,
    /// Unique application name.
    pub unique_name: String,
}

fn braced_guid() -> String {
    format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase())
}

impl QwcConfig {
    /// Builds the configuration for `profile` with fresh owner and file GUIDs.
    pub fn for_profile(profile: Profile) -> Self {
        let app_name = match profile.suffix() {
            "" => "QB Sync".to_string(),
            suffix => format!("QB Sync ({suffix})"),
        };
        let unique_name = match profile.suffix() {
            "" => "QBSync_v1".to_string(),
            suffix => format!("QBSync_{suffix}_v1"),
        };
        let server_url = profile.server_url().to_string();
        Self {
            description: format!("{app_name}: read-only QuickBooks data sync"),
            app_name,
            app_id: String::new(),
            support_url: format!("{server_url}/support"),
            server_url,
            username: profile.username().to_string(),
            owner_id: braced_guid(),
            file_id: braced_guid(),
            interval_minutes: profile.interval_minutes(),
            read_only: true,
            unique_name,
        }
    }

    /// Points the configuration at another server.
    pub fn with_server_url(mut self, url: &str) -> Self {
        let url = url.trim_end_matches('/');
        self.server_url = url.to_string();
        self.support_url = format!("{url}/support");
        self
    }

    /// Overrides the user name.
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    /// Full SOAP endpoint URL.
    pub fn app_url(&self) -> String {
        format!("{}{ENDPOINT_PATH}", self.server_url)
    }

    /// Renders the `.qwc` document.
    pub fn to_xml(&self) -> CodecResult<String> {
        let scheduler = XmlElement::new("Scheduler").with_child(XmlElement::text_node(
            "RunEveryNMinutes",
            self.interval_minutes.to_string(),
        ));
        let root = XmlElement::new("QBWCXML")
            .with_child(XmlElement::text_node("AppName", &self.app_name))
            .with_child(XmlElement::text_node("AppID", &self.app_id))
            .with_child(XmlElement::text_node("AppURL", self.app_url()))
            .with_child(XmlElement::text_node("AppDescription", &self.description))
            .with_child(XmlElement::text_node("AppSupport", &self.support_url))
            .with_child(XmlElement::text_node("UserName", &self.username))
            .with_child(XmlElement::text_node("OwnerID", &self.owner_id))
            .with_child(XmlElement::text_node("FileID", &self.file_id))
            .with_child(XmlElement::text_node("QBType", "QBFS"))
            .with_child(scheduler)
            .with_child(XmlElement::text_node("IsReadOnly", self.read_only.to_string()))
            .with_child(XmlElement::text_node("AuthFlags", "0x0"))
            .with_child(XmlElement::text_node("Notify", "true"))
            .with_child(XmlElement::text_node("AppUniqueName", &self.unique_name))
            .with_child(XmlElement::text_node("AppDisplayName", &self.app_name));
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n",
            root.to_xml()?
        ))
    }
}

/// Runs the qwc command.
pub fn run(
    profile: Profile,
    server_url: Option<&str>,
    username: Option<&str>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = QwcConfig::for_profile(profile);
    if let Some(url) = server_url {
        config = config.with_server_url(url);
    }
    if let Some(username) = username {
        config = config.with_username(username);
    }
    let xml = config.to_xml()?;

    match output {
        Some(path) => {
            fs::write(path, &xml)?;
            info!(
                path = %path.display(),
                url = %config.app_url(),
                username = %config.username,
                "wrote Web Connector configuration"
            );
        }
        None => print!("{xml}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbsync_protocol::parse_document;

    #[test]
    fn profiles_differ_in_schedule() {
        assert_eq!(Profile::Development.interval_minutes(), 5);
        assert_eq!(Profile::Sandbox.interval_minutes(), 10);
        assert_eq!(Profile::Production.interval_minutes(), 60);
    }

    #[test]
    fn document_carries_every_field() {
        let config = QwcConfig::for_profile(Profile::Production)
            .with_server_url("https://sync.example.org/");
        let root = parse_document(&config.to_xml().unwrap()).unwrap().unwrap();

        assert_eq!(root.local_name(), "QBWCXML");
        assert_eq!(root.child_text("AppURL"), Some("https://sync.example.org/qbwc"));
        assert_eq!(
            root.child_text("AppSupport"),
            Some("https://sync.example.org/support")
        );
        assert_eq!(root.child_text("UserName"), Some("qbsync"));
        assert_eq!(root.child_text("QBType"), Some("QBFS"));
        assert_eq!(root.child_text("IsReadOnly"), Some("true"));
        assert_eq!(
            root.child("Scheduler")
                .and_then(|s| s.child_text("RunEveryNMinutes")),
            Some("60")
        );
        assert_eq!(root.child_text("AppDisplayName"), Some("QB Sync"));
    }

    #[test]
    fn guids_are_braced_and_fresh() {
        let a = QwcConfig::for_profile(Profile::Development);
        let b = QwcConfig::for_profile(Profile::Development);
        assert!(a.owner_id.starts_with('{') && a.owner_id.ends_with('}'));
        assert_eq!(a.owner_id.len(), 38);
        assert_ne!(a.owner_id, b.owner_id);
        assert_ne!(a.file_id, b.file_id);
    }

    #[test]
    fn markup_in_names_is_escaped() {
        let config = QwcConfig::for_profile(Profile::Sandbox).with_username("ops<&>team");
        let xml = config.to_xml().unwrap();
        assert!(!xml.contains("ops<&>team"));
        let root = parse_document(&xml).unwrap().unwrap();
        assert_eq!(root.child_text("UserName"), Some("ops<&>team"));
    }

    #[test]
    fn run_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("QBSync.qwc");
        run(Profile::Sandbox, None, Some("tiles"), Some(&path)).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        let root = parse_document(&written).unwrap().unwrap();
        assert_eq!(root.child_text("UserName"), Some("tiles"));
        assert_eq!(root.child_text("AppName"), Some("QB Sync (Sandbox)"));
    }
}
