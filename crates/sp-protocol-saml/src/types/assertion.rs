//! SAML Assertion types.
//!
//! Assertions carry the statements an IdP makes about a subject: who it is
//! (subject and name ID), when the statement holds (conditions), how the subject
//! authenticated and which attributes it has.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::message::{
    format_instant, generate_id, issuer_of, optional_instant, parse_instant, push_attr,
    required_attr,
};
use super::{NameId, CM_BEARER, SAML_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// A SAML assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Assertion ID.
    pub id: String,
    /// When the assertion was issued.
    pub issue_instant: DateTime<Utc>,
    /// Issuing entity.
    pub issuer: String,
    /// The subject.
    pub subject: Option<Subject>,
    /// Validity conditions.
    pub conditions: Option<Conditions>,
    /// Authentication statements.
    pub authn_statements: Vec<AuthnStatement>,
    /// Attributes from all attribute statements.
    pub attributes: Vec<Attribute>,
}

impl Assertion {
    /// Creates an empty assertion.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            subject: None,
            conditions: None,
            authn_statements: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Adds an authentication statement.
    #[must_use]
    pub fn with_authn_statement(mut self, statement: AuthnStatement) -> Self {
        self.authn_statements.push(statement);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Attributes as a name to values map. Values of repeated names are merged.
    #[must_use]
    pub fn attribute_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for attr in &self.attributes {
            map.entry(attr.name.clone())
                .or_default()
                .extend(attr.values.iter().cloned());
        }
        map
    }

    /// Session index from the first authentication statement.
    #[must_use]
    pub fn session_index(&self) -> Option<&str> {
        self.authn_statements
            .iter()
            .find_map(|s| s.session_index.as_deref())
    }

    /// Reads a `saml:Assertion` element.
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        let subject = element.child("Subject").map(Subject::from_element).transpose()?;
        let conditions = element
            .child("Conditions")
            .map(Conditions::from_element)
            .transpose()?;
        let authn_statements = element
            .children_named("AuthnStatement")
            .map(AuthnStatement::from_element)
            .collect::<SamlResult<Vec<_>>>()?;
        let mut attributes = Vec::new();
        for statement in element.children_named("AttributeStatement") {
            for attr in statement.children_named("Attribute") {
                attributes.push(Attribute::from_element(attr)?);
            }
        }
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: issuer_of(element)?,
            subject,
            conditions,
            authn_statements,
            attributes,
        })
    }

    /// Serializes as a `saml:Assertion` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = format!(
            "<saml:Assertion xmlns:saml=\"{SAML_NS}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\">",
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        out.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer)));
        if let Some(subject) = &self.subject {
            out.push_str(&subject.to_xml());
        }
        if let Some(conditions) = &self.conditions {
            out.push_str(&conditions.to_xml());
        }
        for statement in &self.authn_statements {
            out.push_str(&statement.to_xml());
        }
        if !self.attributes.is_empty() {
            out.push_str("<saml:AttributeStatement>");
            for attr in &self.attributes {
                out.push_str(&attr.to_xml());
            }
            out.push_str("</saml:AttributeStatement>");
        }
        out.push_str("</saml:Assertion>");
        out
    }
}

/// Subject of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// The name identifier.
    pub name_id: Option<NameId>,
    /// Subject confirmations.
    pub confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    /// Creates a subject with a name ID.
    #[must_use]
    pub fn new(name_id: NameId) -> Self {
        Self {
            name_id: Some(name_id),
            confirmations: Vec::new(),
        }
    }

    /// Adds a confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.confirmations.push(confirmation);
        self
    }

    fn from_element(element: &Element) -> SamlResult<Self> {
        Ok(Self {
            name_id: element.child("NameID").map(NameId::from_element).transpose()?,
            confirmations: element
                .children_named("SubjectConfirmation")
                .map(SubjectConfirmation::from_element)
                .collect::<SamlResult<Vec<_>>>()?,
        })
    }

    fn to_xml(&self) -> String {
        let mut out = String::from("<saml:Subject>");
        if let Some(name_id) = &self.name_id {
            out.push_str(&name_id.to_xml());
        }
        for c in &self.confirmations {
            out.push_str(&c.to_xml());
        }
        out.push_str("</saml:Subject>");
        out
    }
}

/// Subject confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmation {
    /// Confirmation method URI.
    pub method: String,
    /// Confirmation data.
    pub data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    /// Creates a bearer confirmation.
    #[must_use]
    pub fn bearer(data: SubjectConfirmationData) -> Self {
        Self {
            method: CM_BEARER.to_string(),
            data: Some(data),
        }
    }

    fn from_element(element: &Element) -> SamlResult<Self> {
        let data = match element.child("SubjectConfirmationData") {
            Some(d) => Some(SubjectConfirmationData {
                not_on_or_after: optional_instant(d, "NotOnOrAfter")?,
                recipient: d.attr("Recipient").map(str::to_string),
                in_response_to: d.attr("InResponseTo").map(str::to_string),
            }),
            None => None,
        };
        Ok(Self {
            method: required_attr(element, "Method")?.to_string(),
            data,
        })
    }

    fn to_xml(&self) -> String {
        let mut out = format!("<saml:SubjectConfirmation Method=\"{}\">", escape(&self.method));
        if let Some(d) = &self.data {
            out.push_str("<saml:SubjectConfirmationData");
            push_attr(&mut out, "NotOnOrAfter", d.not_on_or_after.map(format_instant).as_deref());
            push_attr(&mut out, "Recipient", d.recipient.as_deref());
            push_attr(&mut out, "InResponseTo", d.in_response_to.as_deref());
            out.push_str("/>");
        }
        out.push_str("</saml:SubjectConfirmation>");
        out
    }
}

/// Subject confirmation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmationData {
    /// Confirmation expires at this instant.
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// URL the assertion must be delivered to.
    pub recipient: Option<String>,
    /// Request the assertion answers.
    pub in_response_to: Option<String>,
}

impl SubjectConfirmationData {
    /// Confirmation data for a response to `request_id`, valid for `minutes`.
    #[must_use]
    pub fn for_request(request_id: impl Into<String>, recipient: impl Into<String>, minutes: i64) -> Self {
        Self {
            not_on_or_after: Some(Utc::now() + Duration::minutes(minutes)),
            recipient: Some(recipient.into()),
            in_response_to: Some(request_id.into()),
        }
    }
}

/// Assertion validity conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Not valid before this instant.
    pub not_before: Option<DateTime<Utc>>,
    /// Not valid at or after this instant.
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Allowed audiences.
    pub audiences: Vec<String>,
}

impl Conditions {
    /// Conditions valid from now for `minutes`.
    #[must_use]
    pub fn with_validity(minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            not_before: Some(now),
            not_on_or_after: Some(now + Duration::minutes(minutes)),
            audiences: Vec::new(),
        }
    }

    /// Adds an audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }

    fn from_element(element: &Element) -> SamlResult<Self> {
        let audiences = element
            .children_named("AudienceRestriction")
            .flat_map(|r| r.children_named("Audience"))
            .map(|a| a.text().trim().to_string())
            .collect();
        Ok(Self {
            not_before: optional_instant(element, "NotBefore")?,
            not_on_or_after: optional_instant(element, "NotOnOrAfter")?,
            audiences,
        })
    }

    fn to_xml(&self) -> String {
        let mut out = String::from("<saml:Conditions");
        push_attr(&mut out, "NotBefore", self.not_before.map(format_instant).as_deref());
        push_attr(&mut out, "NotOnOrAfter", self.not_on_or_after.map(format_instant).as_deref());
        out.push('>');
        if !self.audiences.is_empty() {
            out.push_str("<saml:AudienceRestriction>");
            for a in &self.audiences {
                out.push_str(&format!("<saml:Audience>{}</saml:Audience>", escape(a)));
            }
            out.push_str("</saml:AudienceRestriction>");
        }
        out.push_str("</saml:Conditions>");
        out
    }
}

/// Authentication statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnStatement {
    /// When the subject authenticated.
    pub authn_instant: DateTime<Utc>,
    /// Session index at the IdP.
    pub session_index: Option<String>,
    /// End of the IdP session.
    pub session_not_on_or_after: Option<DateTime<Utc>>,
    /// Authentication context class reference.
    pub context_class: Option<String>,
}

impl AuthnStatement {
    /// Statement for an authentication happening now.
    #[must_use]
    pub fn new(context_class: impl Into<String>) -> Self {
        Self {
            authn_instant: Utc::now(),
            session_index: Some(generate_id()),
            session_not_on_or_after: None,
            context_class: Some(context_class.into()),
        }
    }

    /// Sets the session lifetime.
    #[must_use]
    pub fn with_session_timeout(mut self, minutes: i64) -> Self {
        self.session_not_on_or_after = Some(self.authn_instant + Duration::minutes(minutes));
        self
    }

    fn from_element(element: &Element) -> SamlResult<Self> {
        Ok(Self {
            authn_instant: parse_instant(required_attr(element, "AuthnInstant")?)?,
            session_index: element.attr("SessionIndex").map(str::to_string),
            session_not_on_or_after: optional_instant(element, "SessionNotOnOrAfter")?,
            context_class: element
                .child("AuthnContext")
                .and_then(|c| c.child_text("AuthnContextClassRef")),
        })
    }

    fn to_xml(&self) -> String {
        let mut out = format!(
            "<saml:AuthnStatement AuthnInstant=\"{}\"",
            format_instant(self.authn_instant)
        );
        push_attr(&mut out, "SessionIndex", self.session_index.as_deref());
        push_attr(
            &mut out,
            "SessionNotOnOrAfter",
            self.session_not_on_or_after.map(format_instant).as_deref(),
        );
        out.push('>');
        if let Some(class) = &self.context_class {
            out.push_str(&format!(
                "<saml:AuthnContext><saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef></saml:AuthnContext>",
                escape(class)
            ));
        }
        out.push_str("</saml:AuthnStatement>");
        out
    }
}

/// A SAML attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Friendly name.
    pub friendly_name: Option<String>,
    /// Values.
    pub values: Vec<String>,
}

impl Attribute {
    /// Single-valued attribute.
    #[must_use]
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::multi(name, vec![value.into()])
    }

    /// Multi-valued attribute.
    #[must_use]
    pub fn multi(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            friendly_name: None,
            values,
        }
    }

    fn from_element(element: &Element) -> SamlResult<Self> {
        let name = element
            .attr("Name")
            .ok_or_else(|| SamlError::MalformedMessage("Attribute has no Name".to_string()))?;
        Ok(Self {
            name: name.to_string(),
            friendly_name: element.attr("FriendlyName").map(str::to_string),
            values: element
                .children_named("AttributeValue")
                .map(Element::text)
                .collect(),
        })
    }

    fn to_xml(&self) -> String {
        let mut out = format!("<saml:Attribute Name=\"{}\"", escape(&self.name));
        push_attr(&mut out, "FriendlyName", self.friendly_name.as_deref());
        out.push('>');
        for v in &self.values {
            out.push_str(&format!("<saml:AttributeValue>{}</saml:AttributeValue>", escape(v)));
        }
        out.push_str("</saml:Attribute>");
        out
    }
}
