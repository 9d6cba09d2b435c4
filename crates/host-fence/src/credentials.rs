//! IPMI credentials from host metadata.
//!
//! The cluster manager hands the hook the failed host's record as
//! base64-encoded XML. Only three leaf elements of `HOST/TEMPLATE` matter, so
//! they are picked out directly instead of building a document tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;

use crate::error::CredentialError;

/// Template attribute holding the BMC address.
pub const IPMI_IP: &str = "IPMI_IP";
/// Template attribute holding the BMC user.
pub const IPMI_USER: &str = "IPMI_USER";
/// Template attribute holding the BMC password.
pub const IPMI_PASS: &str = "IPMI_PASS";

static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<TEMPLATE>(.*?)</TEMPLATE>").expect("static regex"));

/// BMC access for one host.
#[derive(Clone, PartialEq, Eq)]
pub struct IpmiCredentials {
    /// BMC IP address or hostname.
    pub address: String,
    /// BMC user.
    pub user: String,
    /// BMC password.
    pub password: String,
}

impl fmt::Debug for IpmiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpmiCredentials")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

/// Credential fields found so far; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialCredentials {
    pub address: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl PartialCredentials {
    /// Decode a base64 host record and read the IPMI attributes of its
    /// template.
    ///
    /// # Errors
    /// Returns an error if the blob is not base64-encoded UTF-8.
    pub fn from_encoded_template(blob: &str) -> Result<Self, CredentialError> {
        let cleaned: String = blob.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(cleaned)?;
        let xml = String::from_utf8(bytes)?;
        Ok(Self::from_xml(&xml))
    }

    /// Read the IPMI attributes from the `TEMPLATE` element of a host record.
    #[must_use]
    pub fn from_xml(xml: &str) -> Self {
        let Some(template) = TEMPLATE_RE.captures(xml).and_then(|c| c.get(1)) else {
            return Self::default();
        };
        let template = template.as_str();

        Self {
            address: xml_leaf(template, IPMI_IP),
            user: xml_leaf(template, IPMI_USER),
            password: xml_leaf(template, IPMI_PASS),
        }
    }

    /// Read the IPMI attributes from a flat template map.
    #[must_use]
    pub fn from_template(template: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            template
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            address: get(IPMI_IP),
            user: get(IPMI_USER),
            password: get(IPMI_PASS),
        }
    }

    /// Fill fields still missing from `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            address: self.address.or(other.address),
            user: self.user.or(other.user),
            password: self.password.or(other.password),
        }
    }

    /// Whether all three fields are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.address.is_some() && self.user.is_some() && self.password.is_some()
    }

    /// Require all three fields.
    ///
    /// # Errors
    /// Returns [`CredentialError::Incomplete`] naming the missing attributes.
    pub fn complete(self) -> Result<IpmiCredentials, CredentialError> {
        match (self.address, self.user, self.password) {
            (Some(address), Some(user), Some(password)) => Ok(IpmiCredentials {
                address,
                user,
                password,
            }),
            (address, user, password) => {
                let missing = [(address, IPMI_IP), (user, IPMI_USER), (password, IPMI_PASS)]
                    .into_iter()
                    .filter_map(|(value, name)| value.is_none().then_some(name))
                    .collect();
                Err(CredentialError::Incomplete(missing))
            }
        }
    }
}

/// Text of `<name>...</name>`, plain or CDATA, trimmed. Empty counts as absent.
fn xml_leaf(xml: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r"(?s)<{name}>\s*(?:<!\[CDATA\[(.*?)\]\]>|([^<]*))\s*</{name}>",
        name = regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let captures = re.captures(xml)?;
    // CDATA content is literal; only plain text carries entities.
    let value = match (captures.get(1), captures.get(2)) {
        (Some(cdata), _) => cdata.as_str().trim().to_string(),
        (None, Some(text)) => unescape_xml(text.as_str().trim()),
        (None, None) => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
