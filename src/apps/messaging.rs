use crate::aggregate::{count_by_many, percent_of, percentage, CategoryCount};
use crate::apps::{collection_key, trimmed, Workspace};
use crate::collection::{Collection, Draft, Entity};
use crate::db::Persistence;
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, FieldErrors, ImportSummary, StoreSettings, TransitionPolicy};
use crate::status::{HasStatus, Lifecycle};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 ()-]{5,19}$").expect("valid phone regex"));

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("valid placeholder regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
}

impl Lifecycle for CampaignStatus {
    const ALL: &'static [Self] = &[
        Self::Draft,
        Self::Scheduled,
        Self::Sending,
        Self::Completed,
        Self::Cancelled,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Scheduled, Self::Sending, Self::Cancelled],
            Self::Scheduled => &[Self::Draft, Self::Sending, Self::Cancelled],
            Self::Sending => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateCategory {
    #[default]
    Marketing,
    Utility,
    Authentication,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub tags: Vec<String>,
    pub opted_in: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDraft {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "opted_in_default")]
    pub opted_in: bool,
}

fn opted_in_default() -> bool {
    true
}

impl ContactDraft {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: None,
            tags: Vec::new(),
            opted_in: opted_in_default(),
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn opted_in(mut self, opted_in: bool) -> Self {
        self.opted_in = opted_in;
        self
    }
}

impl Draft for ContactDraft {
    type Output = Contact;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Contact {
        let mut tags = trimmed(self.tags);
        tags.dedup();
        Contact {
            id,
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: self
                .email
                .map(|email| email.trim().to_string())
                .filter(|email| !email.is_empty()),
            tags,
            opted_in: self.opted_in,
            created_at,
        }
    }
}

impl Entity for Contact {
    type Draft = ContactDraft;
    const KIND: &'static str = "contact";
    const ID_PREFIX: &'static str = "contact";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.require("phone", &self.phone);
        if !self.phone.trim().is_empty() {
            errors.check(
                PHONE_PATTERN.is_match(self.phone.trim()),
                "phone",
                "is not a valid phone number",
            );
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub id: String,
    pub name: String,
    pub body: String,
    pub category: TemplateCategory,
    pub created_at: DateTime<Utc>,
}

impl MessageTemplate {
    /// Fills `{{name}}` and `{{phone}}` from the contact. Unknown placeholders
    /// are left as written.
    pub fn render(&self, contact: &Contact) -> String {
        PLACEHOLDER
            .replace_all(&self.body, |captures: &Captures| {
                match captures[1].to_ascii_lowercase().as_str() {
                    "name" => contact.name.clone(),
                    "phone" => contact.phone.clone(),
                    _ => captures[0].to_string(),
                }
            })
            .into_owned()
    }

    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = PLACEHOLDER
            .captures_iter(&self.body)
            .map(|captures| captures[1].to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplateDraft {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub category: TemplateCategory,
}

impl MessageTemplateDraft {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            category: TemplateCategory::default(),
        }
    }

    pub fn category(mut self, category: TemplateCategory) -> Self {
        self.category = category;
        self
    }
}

impl Draft for MessageTemplateDraft {
    type Output = MessageTemplate;

    fn build(self, id: String, created_at: DateTime<Utc>) -> MessageTemplate {
        MessageTemplate {
            id,
            name: self.name.trim().to_string(),
            body: self.body,
            category: self.category,
            created_at,
        }
    }
}

impl Entity for MessageTemplate {
    type Draft = MessageTemplateDraft;
    const KIND: &'static str = "template";
    const ID_PREFIX: &'static str = "tmpl";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.require("body", &self.body);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub template_id: Option<String>,
    pub contact_ids: Vec<String>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_count: u32,
    pub delivered_count: u32,
    pub read_count: u32,
    pub failed_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDraft {
    pub name: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub contact_ids: Vec<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CampaignDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_id: None,
            contact_ids: Vec::new(),
            scheduled_at: None,
        }
    }

    pub fn template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_ids.push(contact_id.into());
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

impl Draft for CampaignDraft {
    type Output = Campaign;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Campaign {
        let mut seen = HashSet::new();
        let contact_ids = trimmed(self.contact_ids)
            .into_iter()
            .filter(|contact_id| seen.insert(contact_id.clone()))
            .collect();
        Campaign {
            id,
            name: self.name.trim().to_string(),
            template_id: self.template_id.filter(|template_id| !template_id.trim().is_empty()),
            contact_ids,
            status: CampaignStatus::Draft,
            scheduled_at: self.scheduled_at,
            sent_count: 0,
            delivered_count: 0,
            read_count: 0,
            failed_count: 0,
            created_at,
        }
    }
}

impl Entity for Campaign {
    type Draft = CampaignDraft;
    const KIND: &'static str = "campaign";
    const ID_PREFIX: &'static str = "campaign";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.check(
            self.delivered_count <= self.sent_count,
            "deliveredCount",
            "cannot exceed sentCount",
        );
        errors.check(
            self.read_count <= self.delivered_count,
            "readCount",
            "cannot exceed deliveredCount",
        );
        errors.into_result()
    }
}

impl HasStatus for Campaign {
    type Status = CampaignStatus;

    fn status(&self) -> CampaignStatus {
        self.status
    }

    fn set_status(&mut self, status: CampaignStatus) {
        self.status = status;
    }
}

/// Delivery counters reported back by the sending provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub sent: u32,
    pub delivered: u32,
    pub read: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    pub contact_id: String,
    pub phone: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingSummary {
    pub total_contacts: usize,
    pub total_templates: usize,
    pub campaigns_by_status: Vec<CategoryCount<CampaignStatus>>,
    pub delivery_rate: f64,
    pub read_rate: f64,
    pub opted_in_percentage: f64,
    pub contacts_per_tag: BTreeMap<String, usize>,
}

pub struct MessagingWorkspace {
    contacts: Collection<Contact>,
    templates: Collection<MessageTemplate>,
    campaigns: Collection<Campaign>,
}

impl MessagingWorkspace {
    pub fn open(persistence: &Persistence, settings: &StoreSettings) -> Self {
        let mut workspace = Self {
            contacts: Collection::open(persistence.clone(), collection_key(Self::APP, "contacts")),
            templates: Collection::open(persistence.clone(), collection_key(Self::APP, "templates")),
            campaigns: Collection::open(persistence.clone(), collection_key(Self::APP, "campaigns")),
        };
        if workspace.contacts.is_fresh() && workspace.templates.is_fresh() && workspace.campaigns.is_fresh() {
            if settings.seed_sample_data {
                if let Err(error) = workspace.seed_sample_data() {
                    warn!(error = %error, "messaging sample data could not be seeded");
                }
            }
            workspace.contacts.persist();
            workspace.templates.persist();
            workspace.campaigns.persist();
        }
        workspace
    }

    pub fn contacts(&self) -> &Collection<Contact> {
        &self.contacts
    }

    pub fn templates(&self) -> &Collection<MessageTemplate> {
        &self.templates
    }

    pub fn campaigns(&self) -> &Collection<Campaign> {
        &self.campaigns
    }

    pub fn create_contact(&mut self, draft: ContactDraft) -> AppResult<Contact> {
        self.contacts.create(draft)
    }

    pub fn update_contact(&mut self, id: &str, patch: serde_json::Value) -> AppResult<Contact> {
        self.contacts.update(id, patch)
    }

    /// Removes the contact and drops it from every campaign audience.
    pub fn delete_contact(&mut self, id: &str) -> bool {
        if !self.contacts.delete(id) {
            return false;
        }
        let touched = self.campaigns.update_where(
            |campaign| campaign.contact_ids.iter().any(|contact_id| contact_id == id),
            |campaign| campaign.contact_ids.retain(|contact_id| contact_id != id),
        );
        debug!(contact_id = %id, campaigns = touched, "contact removed from campaign audiences");
        true
    }

    pub fn create_template(&mut self, draft: MessageTemplateDraft) -> AppResult<MessageTemplate> {
        self.templates.create(draft)
    }

    pub fn update_template(&mut self, id: &str, patch: serde_json::Value) -> AppResult<MessageTemplate> {
        self.templates.update(id, patch)
    }

    /// Campaigns that used the template keep running without one.
    pub fn delete_template(&mut self, id: &str) -> bool {
        if !self.templates.delete(id) {
            return false;
        }
        self.campaigns.update_where(
            |campaign| campaign.template_id.as_deref() == Some(id),
            |campaign| campaign.template_id = None,
        );
        true
    }

    pub fn create_campaign(&mut self, draft: CampaignDraft) -> AppResult<Campaign> {
        let mut errors = FieldErrors::new();
        if let Some(template_id) = draft.template_id.as_deref().filter(|id| !id.trim().is_empty()) {
            errors.check(
                self.templates.contains(template_id),
                "templateId",
                "does not match an existing template",
            );
        }
        let unknown = draft
            .contact_ids
            .iter()
            .filter(|contact_id| !self.contacts.contains(contact_id.trim()))
            .count();
        if unknown > 0 {
            errors.push("contactIds", format!("{} unknown contact(s)", unknown));
        }
        errors.into_result()?;
        self.campaigns.create(draft)
    }

    pub fn update_campaign(
        &mut self,
        id: &str,
        patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Campaign> {
        self.campaigns.update_with_policy(id, patch, policy)
    }

    pub fn set_campaign_status(
        &mut self,
        id: &str,
        status: CampaignStatus,
        policy: TransitionPolicy,
    ) -> AppResult<Campaign> {
        self.campaigns.set_status(id, status, policy)
    }

    pub fn record_delivery(&mut self, id: &str, report: DeliveryReport) -> AppResult<Campaign> {
        self.campaigns.update(
            id,
            serde_json::json!({
                "sentCount": report.sent,
                "deliveredCount": report.delivered,
                "readCount": report.read,
                "failedCount": report.failed,
            }),
        )
    }

    pub fn delete_campaign(&mut self, id: &str) -> bool {
        self.campaigns.delete(id)
    }

    /// Renders the campaign's template for each opted-in audience member.
    pub fn preview(&self, campaign_id: &str) -> AppResult<Vec<RenderedMessage>> {
        let campaign = self
            .campaigns
            .find(campaign_id)
            .ok_or_else(|| AppError::NotFound(format!("campaign {} not found", campaign_id)))?;
        let template = campaign
            .template_id
            .as_deref()
            .and_then(|template_id| self.templates.find(template_id))
            .ok_or_else(|| {
                let mut errors = FieldErrors::new();
                errors.push("templateId", "campaign has no template");
                AppError::Validation(errors)
            })?;

        Ok(campaign
            .contact_ids
            .iter()
            .filter_map(|contact_id| self.contacts.find(contact_id))
            .filter(|contact| contact.opted_in)
            .map(|contact| RenderedMessage {
                contact_id: contact.id.clone(),
                phone: contact.phone.clone(),
                body: template.render(contact),
            })
            .collect())
    }

    pub fn campaigns_by_status(&self) -> Vec<CategoryCount<CampaignStatus>> {
        self.campaigns.status_counts()
    }

    /// Delivered over sent, across all campaigns.
    pub fn delivery_rate(&self) -> f64 {
        let sent: u64 = self.campaigns.iter().map(|campaign| u64::from(campaign.sent_count)).sum();
        let delivered: u64 = self
            .campaigns
            .iter()
            .map(|campaign| u64::from(campaign.delivered_count))
            .sum();
        percent_of(delivered as f64, sent as f64)
    }

    /// Read over delivered, across all campaigns.
    pub fn read_rate(&self) -> f64 {
        let delivered: u64 = self
            .campaigns
            .iter()
            .map(|campaign| u64::from(campaign.delivered_count))
            .sum();
        let read: u64 = self.campaigns.iter().map(|campaign| u64::from(campaign.read_count)).sum();
        percent_of(read as f64, delivered as f64)
    }

    pub fn opted_in_percentage(&self) -> f64 {
        percentage(self.contacts.filter(|contact| contact.opted_in).len(), self.contacts.len())
    }

    pub fn contacts_per_tag(&self) -> BTreeMap<String, usize> {
        count_by_many(self.contacts.records(), |contact| contact.tags.clone())
    }

    pub fn summary(&self) -> MessagingSummary {
        MessagingSummary {
            total_contacts: self.contacts.len(),
            total_templates: self.templates.len(),
            campaigns_by_status: self.campaigns_by_status(),
            delivery_rate: self.delivery_rate(),
            read_rate: self.read_rate(),
            opted_in_percentage: self.opted_in_percentage(),
            contacts_per_tag: self.contacts_per_tag(),
        }
    }

    fn seed_sample_data(&mut self) -> AppResult<()> {
        let amara = self.contacts.create(
            ContactDraft::new("Amara Okafor", "+2348012345678")
                .tag("vip")
                .tag("lagos"),
        )?;
        let lucas = self
            .contacts
            .create(ContactDraft::new("Lucas Meyer", "+491701234567").tag("wholesale"))?;
        self.contacts.create(
            ContactDraft::new("Dana Whitfield", "+14155550123")
                .tag("vip")
                .opted_in(false),
        )?;

        let welcome = self.templates.create(MessageTemplateDraft::new(
            "Welcome",
            "Hi {{name}}, thanks for joining! Reply STOP to opt out.",
        ))?;
        self.templates.create(
            MessageTemplateDraft::new("Order ready", "Hello {{name}}, your order is ready for pickup.")
                .category(TemplateCategory::Utility),
        )?;

        let launch = self.campaigns.create(
            CampaignDraft::new("Spring launch")
                .template(&welcome.id)
                .contact(&amara.id)
                .contact(&lucas.id),
        )?;
        self.campaigns
            .set_status(&launch.id, CampaignStatus::Completed, TransitionPolicy::Unrestricted)?;
        self.campaigns.update(
            &launch.id,
            serde_json::json!({ "sentCount": 2, "deliveredCount": 2, "readCount": 1 }),
        )?;
        self.campaigns
            .create(CampaignDraft::new("VIP preview").template(&welcome.id).contact(&amara.id))?;
        debug!("messaging sample data seeded");
        Ok(())
    }
}

impl Workspace for MessagingWorkspace {
    const APP: AppKind = AppKind::Messaging;

    fn snapshot(&self) -> AppResult<ExportBundle> {
        let mut bundle = ExportBundle::new(Self::APP);
        bundle.insert("contacts", &self.contacts)?;
        bundle.insert("templates", &self.templates)?;
        bundle.insert("campaigns", &self.campaigns)?;
        Ok(bundle)
    }

    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary> {
        bundle.expect_app(Self::APP)?;
        let contacts = bundle.decode::<Contact>("contacts")?;
        let templates = bundle.decode::<MessageTemplate>("templates")?;
        let campaigns = bundle.decode::<Campaign>("campaigns")?;

        let mut summary = ImportSummary::new(Self::APP);
        if let Some(records) = contacts {
            summary.record("contacts", records.len());
            self.contacts.replace_all(records)?;
        }
        if let Some(records) = templates {
            summary.record("templates", records.len());
            self.templates.replace_all(records)?;
        }
        if let Some(records) = campaigns {
            summary.record("campaigns", records.len());
            self.campaigns.replace_all(records)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CampaignDraft, CampaignStatus, ContactDraft, DeliveryReport, MessageTemplateDraft, MessagingWorkspace,
    };
    use crate::db::Persistence;
    use crate::errors::AppError;
    use crate::models::{StoreSettings, TransitionPolicy};
    use serde_json::json;

    fn empty_workspace() -> MessagingWorkspace {
        let settings = StoreSettings {
            seed_sample_data: false,
            ..StoreSettings::default()
        };
        MessagingWorkspace::open(&Persistence::in_memory(), &settings)
    }

    #[test]
    fn template_renders_known_placeholders_only() {
        let mut workspace = empty_workspace();
        let contact = workspace
            .create_contact(ContactDraft::new("Amara", "+2348012345678"))
            .expect("contact");
        let template = workspace
            .create_template(MessageTemplateDraft::new(
                "Greeting",
                "Hi {{ name }}, we will call {{phone}} about {{order}}.",
            ))
            .expect("template");
        assert_eq!(
            template.render(&contact),
            "Hi Amara, we will call +2348012345678 about {{order}}."
        );
        assert_eq!(template.placeholders(), vec!["name", "order", "phone"]);
    }

    #[test]
    fn contact_phone_is_validated() {
        let mut workspace = empty_workspace();
        let error = workspace
            .create_contact(ContactDraft::new("Bad", "call me"))
            .expect_err("invalid phone");
        assert!(error.to_string().contains("phone"));
        assert!(workspace.contacts().is_empty());
    }

    #[test]
    fn deleting_contact_and_template_cleans_up_campaigns() {
        let mut workspace = empty_workspace();
        let first = workspace
            .create_contact(ContactDraft::new("A", "+15550000001"))
            .expect("contact");
        let second = workspace
            .create_contact(ContactDraft::new("B", "+15550000002"))
            .expect("contact");
        let template = workspace
            .create_template(MessageTemplateDraft::new("T", "Hi {{name}}"))
            .expect("template");
        let campaign = workspace
            .create_campaign(
                CampaignDraft::new("Launch")
                    .template(&template.id)
                    .contact(&first.id)
                    .contact(&second.id)
                    .contact(&first.id),
            )
            .expect("campaign");
        assert_eq!(campaign.contact_ids.len(), 2);

        assert!(workspace.delete_contact(&first.id));
        assert!(!workspace.delete_contact(&first.id));
        let stored = workspace.campaigns().find(&campaign.id).expect("campaign");
        assert_eq!(stored.contact_ids, vec![second.id.clone()]);

        assert!(workspace.delete_template(&template.id));
        let stored = workspace.campaigns().find(&campaign.id).expect("campaign");
        assert_eq!(stored.template_id, None);
        assert!(workspace.preview(&campaign.id).is_err());
    }

    #[test]
    fn campaign_references_must_exist() {
        let mut workspace = empty_workspace();
        let error = workspace
            .create_campaign(CampaignDraft::new("Ghost").template("tmpl-1").contact("contact-1"))
            .expect_err("dangling references");
        let message = error.to_string();
        assert!(message.contains("templateId"));
        assert!(message.contains("contactIds"));
    }

    #[test]
    fn preview_skips_opted_out_contacts() {
        let mut workspace = empty_workspace();
        let opted_in = workspace
            .create_contact(ContactDraft::new("Yes", "+15550000001"))
            .expect("contact");
        let opted_out = workspace
            .create_contact(ContactDraft::new("No", "+15550000002").opted_in(false))
            .expect("contact");
        let template = workspace
            .create_template(MessageTemplateDraft::new("T", "Hello {{name}}"))
            .expect("template");
        let campaign = workspace
            .create_campaign(
                CampaignDraft::new("C")
                    .template(&template.id)
                    .contact(&opted_in.id)
                    .contact(&opted_out.id),
            )
            .expect("campaign");

        let messages = workspace.preview(&campaign.id).expect("preview");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "Hello Yes");
        assert_eq!(workspace.opted_in_percentage(), 50.0);
    }

    #[test]
    fn delivery_and_read_rates_aggregate_counters() {
        let mut workspace = empty_workspace();
        assert_eq!(workspace.delivery_rate(), 0.0);
        let campaign = workspace.create_campaign(CampaignDraft::new("C")).expect("campaign");
        workspace
            .record_delivery(
                &campaign.id,
                DeliveryReport {
                    sent: 8,
                    delivered: 6,
                    read: 3,
                    failed: 2,
                },
            )
            .expect("report");
        assert_eq!(workspace.delivery_rate(), 75.0);
        assert_eq!(workspace.read_rate(), 50.0);

        let impossible = DeliveryReport {
            sent: 1,
            delivered: 5,
            read: 0,
            failed: 0,
        };
        assert!(workspace.record_delivery(&campaign.id, impossible).is_err());
    }

    #[test]
    fn completed_campaign_is_terminal_when_enforced() {
        let mut workspace = empty_workspace();
        let campaign = workspace.create_campaign(CampaignDraft::new("C")).expect("campaign");
        workspace
            .set_campaign_status(&campaign.id, CampaignStatus::Sending, TransitionPolicy::Enforced)
            .expect("sending");
        workspace
            .set_campaign_status(&campaign.id, CampaignStatus::Completed, TransitionPolicy::Enforced)
            .expect("completed");
        assert!(workspace
            .set_campaign_status(&campaign.id, CampaignStatus::Draft, TransitionPolicy::Enforced)
            .is_err());

        let counts = workspace.campaigns_by_status();
        assert_eq!(counts.len(), 5);
        assert_eq!(counts[3].category, CampaignStatus::Completed);
        assert_eq!(counts[3].count, 1);
    }

    #[test]
    fn campaign_patch_cannot_reopen_completed_campaign_when_enforced() {
        let mut workspace = empty_workspace();
        let campaign = workspace.create_campaign(CampaignDraft::new("C")).expect("campaign");
        assert!(workspace
            .update_campaign(&campaign.id, json!({ "status": "completed" }), TransitionPolicy::Enforced)
            .is_err());
        workspace
            .update_campaign(&campaign.id, json!({ "status": "sending" }), TransitionPolicy::Enforced)
            .expect("draft -> sending");
        workspace
            .update_campaign(&campaign.id, json!({ "status": "completed" }), TransitionPolicy::Enforced)
            .expect("sending -> completed");

        let error = workspace
            .update_campaign(&campaign.id, json!({ "status": "draft", "name": "Again" }), TransitionPolicy::Enforced)
            .expect_err("completed is terminal");
        assert!(matches!(error, AppError::InvalidTransition { .. }));
        let stored = workspace.campaigns().find(&campaign.id).expect("campaign");
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.name, "C");

        let renamed = workspace
            .update_campaign(&campaign.id, json!({ "name": "Spring launch" }), TransitionPolicy::Enforced)
            .expect("rename keeps status");
        assert_eq!(renamed.status, CampaignStatus::Completed);
    }

    #[test]
    fn seeded_workspace_counts_tags() {
        let workspace = MessagingWorkspace::open(&Persistence::in_memory(), &StoreSettings::default());
        let tags = workspace.contacts_per_tag();
        assert_eq!(tags.get("vip"), Some(&2));
        assert_eq!(workspace.summary().delivery_rate, 100.0);
    }
}
