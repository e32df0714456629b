use crate::aggregate::{average, join_totals, percentage, round_to, CategoryCount, JoinBucket, JoinIndex};
use crate::apps::{collection_key, Workspace};
use crate::collection::{Collection, Draft, Entity};
use crate::db::Persistence;
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, FieldErrors, ImportSummary, StoreSettings, TransitionPolicy};
use crate::status::{HasStatus, Lifecycle};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const UNKNOWN_CLIENT: &str = "Unknown Client";

static INVOICE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^INV-(\d+)$").expect("valid invoice number regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    /// Issued and still waiting for money.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Sent | Self::Overdue)
    }
}

impl Lifecycle for InvoiceStatus {
    const ALL: &'static [Self] = &[Self::Draft, Self::Sent, Self::Paid, Self::Overdue, Self::Cancelled];

    fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Sent, Self::Cancelled],
            Self::Sent => &[Self::Paid, Self::Overdue, Self::Cancelled],
            Self::Overdue => &[Self::Paid, Self::Cancelled],
            Self::Paid | Self::Cancelled => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    #[default]
    BankTransfer,
    Card,
    Cash,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl ClientDraft {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            company: None,
            address: None,
        }
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

impl Draft for ClientDraft {
    type Output = Client;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Client {
        Client {
            id,
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            company: self.company,
            address: self.address,
            created_at,
        }
    }
}

impl Entity for Client {
    type Draft = ClientDraft;
    const KIND: &'static str = "client";
    const ID_PREFIX: &'static str = "client";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.require("email", &self.email);
        if !self.email.is_empty() {
            errors.check(self.email.contains('@'), "email", "is not a valid address");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: f64, unit_price: f64) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    pub fn amount(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub number: String,
    pub client_id: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub line_items: Vec<LineItem>,
    /// Percentage applied to the subtotal.
    pub tax_rate: f64,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn subtotal(&self) -> f64 {
        round_to(self.line_items.iter().map(LineItem::amount).sum(), 2)
    }

    pub fn tax(&self) -> f64 {
        round_to(self.subtotal() * self.tax_rate / 100.0, 2)
    }

    pub fn total(&self) -> f64 {
        round_to(self.subtotal() + self.tax(), 2)
    }

    pub fn is_past_due(&self, today: NaiveDate) -> bool {
        self.status == InvoiceStatus::Sent && self.due_date < today
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDraft {
    #[serde(default)]
    pub number: String,
    pub client_id: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl InvoiceDraft {
    /// Due thirty days after `issue_date`; use [`InvoiceDraft::due`] to change it.
    pub fn new(client_id: impl Into<String>, issue_date: NaiveDate) -> Self {
        Self {
            number: String::new(),
            client_id: client_id.into(),
            issue_date,
            due_date: issue_date + Duration::days(30),
            line_items: Vec::new(),
            tax_rate: 0.0,
            notes: None,
        }
    }

    pub fn number(mut self, number: impl Into<String>) -> Self {
        self.number = number.into();
        self
    }

    pub fn due(mut self, due_date: NaiveDate) -> Self {
        self.due_date = due_date;
        self
    }

    pub fn item(mut self, description: impl Into<String>, quantity: f64, unit_price: f64) -> Self {
        self.line_items.push(LineItem::new(description, quantity, unit_price));
        self
    }

    pub fn tax_rate(mut self, tax_rate: f64) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl Draft for InvoiceDraft {
    type Output = Invoice;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Invoice {
        Invoice {
            id,
            number: self.number.trim().to_string(),
            client_id: self.client_id,
            issue_date: self.issue_date,
            due_date: self.due_date,
            line_items: self
                .line_items
                .into_iter()
                .map(|item| LineItem {
                    description: item.description.trim().to_string(),
                    ..item
                })
                .collect(),
            tax_rate: self.tax_rate,
            status: InvoiceStatus::Draft,
            notes: self.notes,
            created_at,
        }
    }
}

impl Entity for Invoice {
    type Draft = InvoiceDraft;
    const KIND: &'static str = "invoice";
    const ID_PREFIX: &'static str = "invoice";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("number", &self.number);
        errors.require("clientId", &self.client_id);
        errors.check(self.due_date >= self.issue_date, "dueDate", "cannot be before issueDate");
        errors.check(!self.line_items.is_empty(), "lineItems", "needs at least one item");
        errors.check(
            (0.0..=100.0).contains(&self.tax_rate),
            "taxRate",
            "must be between 0 and 100",
        );
        for (index, item) in self.line_items.iter().enumerate() {
            if item.description.trim().is_empty() {
                errors.push("lineItems", format!("item {} needs a description", index + 1));
            }
            if item.quantity <= 0.0 || item.unit_price < 0.0 {
                errors.push("lineItems", format!("item {} has an invalid quantity or price", index + 1));
            }
        }
        errors.into_result()
    }
}

impl HasStatus for Invoice {
    type Status = InvoiceStatus;

    fn status(&self) -> InvoiceStatus {
        self.status
    }

    fn set_status(&mut self, status: InvoiceStatus) {
        self.status = status;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub amount: f64,
    pub paid_on: NaiveDate,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDraft {
    pub invoice_id: String,
    pub amount: f64,
    pub paid_on: NaiveDate,
    #[serde(default)]
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
}

impl PaymentDraft {
    pub fn new(invoice_id: impl Into<String>, amount: f64, paid_on: NaiveDate) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            amount,
            paid_on,
            method: PaymentMethod::default(),
            reference: None,
        }
    }

    pub fn method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

impl Draft for PaymentDraft {
    type Output = Payment;

    fn build(self, id: String, created_at: DateTime<Utc>) -> Payment {
        Payment {
            id,
            invoice_id: self.invoice_id,
            amount: round_to(self.amount, 2),
            paid_on: self.paid_on,
            method: self.method,
            reference: self.reference,
            created_at,
        }
    }
}

impl Entity for Payment {
    type Draft = PaymentDraft;
    const KIND: &'static str = "payment";
    const ID_PREFIX: &'static str = "payment";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("invoiceId", &self.invoice_id);
        errors.check(self.amount > 0.0, "amount", "must be positive");
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub client_name: String,
    pub total: f64,
    pub amount_paid: f64,
    pub balance_due: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicesSummary {
    pub total_invoices: usize,
    pub invoices_by_status: Vec<CategoryCount<InvoiceStatus>>,
    pub outstanding_balance: f64,
    pub total_collected: f64,
    pub average_invoice_value: f64,
    pub paid_percentage: f64,
    pub revenue_per_client: Vec<JoinBucket>,
}

pub struct InvoicesWorkspace {
    clients: Collection<Client>,
    invoices: Collection<Invoice>,
    payments: Collection<Payment>,
}

impl InvoicesWorkspace {
    pub fn open(persistence: &Persistence, settings: &StoreSettings) -> Self {
        let mut workspace = Self {
            clients: Collection::open(persistence.clone(), collection_key(Self::APP, "clients")),
            invoices: Collection::open(persistence.clone(), collection_key(Self::APP, "invoices")),
            payments: Collection::open(persistence.clone(), collection_key(Self::APP, "payments")),
        };
        if workspace.clients.is_fresh() && workspace.invoices.is_fresh() && workspace.payments.is_fresh() {
            if settings.seed_sample_data {
                if let Err(error) = workspace.seed_sample_data() {
                    warn!(error = %error, "invoice sample data could not be seeded");
                }
            }
            workspace.clients.persist();
            workspace.invoices.persist();
            workspace.payments.persist();
        }
        workspace
    }

    pub fn clients(&self) -> &Collection<Client> {
        &self.clients
    }

    pub fn invoices(&self) -> &Collection<Invoice> {
        &self.invoices
    }

    pub fn payments(&self) -> &Collection<Payment> {
        &self.payments
    }

    pub fn create_client(&mut self, draft: ClientDraft) -> AppResult<Client> {
        self.clients.create(draft)
    }

    pub fn update_client(&mut self, id: &str, patch: serde_json::Value) -> AppResult<Client> {
        self.clients.update(id, patch)
    }

    /// Invoices of a deleted client stay on the books under [`UNKNOWN_CLIENT`].
    pub fn delete_client(&mut self, id: &str) -> bool {
        self.clients.delete(id)
    }

    /// Creates a draft invoice. A blank number gets the next `INV-NNNN`.
    pub fn create_invoice(&mut self, mut draft: InvoiceDraft) -> AppResult<Invoice> {
        if !self.clients.contains(&draft.client_id) {
            let mut errors = FieldErrors::new();
            errors.push("clientId", "does not match an existing client");
            return Err(AppError::Validation(errors));
        }
        if draft.number.trim().is_empty() {
            draft.number = self.next_invoice_number();
        } else if self
            .invoices
            .iter()
            .any(|invoice| invoice.number == draft.number.trim())
        {
            let mut errors = FieldErrors::new();
            errors.push("number", "is already used by another invoice");
            return Err(AppError::Validation(errors));
        }
        self.invoices.create(draft)
    }

    /// A `status` in the patch must be a transition `policy` allows, and a
    /// `number` must not belong to another invoice.
    pub fn update_invoice(
        &mut self,
        id: &str,
        mut patch: serde_json::Value,
        policy: TransitionPolicy,
    ) -> AppResult<Invoice> {
        let number = patch
            .get("number")
            .and_then(|value| value.as_str())
            .map(|number| number.trim().to_string());
        if let Some(number) = number {
            if self
                .invoices
                .iter()
                .any(|invoice| invoice.id != id && invoice.number == number)
            {
                let mut errors = FieldErrors::new();
                errors.push("number", "is already used by another invoice");
                return Err(AppError::Validation(errors));
            }
            patch["number"] = serde_json::Value::String(number);
        }
        self.invoices.update_with_policy(id, patch, policy)
    }

    pub fn set_invoice_status(
        &mut self,
        id: &str,
        status: InvoiceStatus,
        policy: TransitionPolicy,
    ) -> AppResult<Invoice> {
        self.invoices.set_status(id, status, policy)
    }

    /// Deletes the invoice together with its payments.
    pub fn delete_invoice(&mut self, id: &str) -> bool {
        if !self.invoices.delete(id) {
            return false;
        }
        let removed = self.payments.delete_where(|payment| payment.invoice_id == id);
        debug!(invoice_id = %id, payments = removed.len(), "invoice payments deleted");
        true
    }

    /// Records a payment. An open invoice that is covered in full moves to
    /// paid.
    pub fn record_payment(&mut self, draft: PaymentDraft) -> AppResult<Payment> {
        let invoice = self
            .invoices
            .find(&draft.invoice_id)
            .ok_or_else(|| AppError::NotFound(format!("invoice {} not found", draft.invoice_id)))?;
        if !invoice.status.is_open() {
            let mut errors = FieldErrors::new();
            errors.push(
                "invoiceId",
                format!("cannot take payments while {}", invoice.status.as_str()),
            );
            return Err(AppError::Validation(errors));
        }
        let invoice_id = invoice.id.clone();
        let balance = self.balance_due(&invoice_id);
        if draft.amount > balance + 0.005 {
            let mut errors = FieldErrors::new();
            errors.push("amount", format!("exceeds balance due of {:.2}", balance));
            return Err(AppError::Validation(errors));
        }
        let payment = self.payments.create(draft)?;
        if self.balance_due(&invoice_id) <= 0.0 {
            self.invoices
                .set_status(&invoice_id, InvoiceStatus::Paid, TransitionPolicy::Unrestricted)?;
        }
        Ok(payment)
    }

    pub fn delete_payment(&mut self, id: &str) -> bool {
        self.payments.delete(id)
    }

    /// Moves every sent invoice whose due date is before `today` to overdue.
    pub fn mark_overdue(&mut self, today: NaiveDate) -> usize {
        let moved = self.invoices.update_where(
            |invoice| invoice.is_past_due(today),
            |invoice| invoice.status = InvoiceStatus::Overdue,
        );
        if moved > 0 {
            info!(count = moved, %today, "invoices marked overdue");
        }
        moved
    }

    pub fn amount_paid(&self, invoice_id: &str) -> f64 {
        round_to(
            self.payments
                .iter()
                .filter(|payment| payment.invoice_id == invoice_id)
                .map(|payment| payment.amount)
                .sum(),
            2,
        )
    }

    pub fn balance_due(&self, invoice_id: &str) -> f64 {
        match self.invoices.find(invoice_id) {
            Some(invoice) => round_to((invoice.total() - self.amount_paid(invoice_id)).max(0.0), 2),
            None => 0.0,
        }
    }

    pub fn client_name_for(&self, invoice: &Invoice) -> String {
        JoinIndex::new(self.clients.records()).label(
            Some(invoice.client_id.as_str()),
            |client| client.name.clone(),
            UNKNOWN_CLIENT,
        )
    }

    pub fn invoice_views(&self) -> Vec<InvoiceView> {
        let clients = JoinIndex::new(self.clients.records());
        self.invoices
            .iter()
            .map(|invoice| {
                let amount_paid = self.amount_paid(&invoice.id);
                InvoiceView {
                    invoice: invoice.clone(),
                    client_name: clients.label(
                        Some(invoice.client_id.as_str()),
                        |client| client.name.clone(),
                        UNKNOWN_CLIENT,
                    ),
                    total: invoice.total(),
                    amount_paid,
                    balance_due: self.balance_due(&invoice.id),
                }
            })
            .collect()
    }

    pub fn invoices_by_status(&self) -> Vec<CategoryCount<InvoiceStatus>> {
        self.invoices.status_counts()
    }

    /// Unpaid amount across sent and overdue invoices.
    pub fn outstanding_balance(&self) -> f64 {
        round_to(
            self.invoices
                .iter()
                .filter(|invoice| invoice.status.is_open())
                .map(|invoice| self.balance_due(&invoice.id))
                .sum(),
            2,
        )
    }

    pub fn total_collected(&self) -> f64 {
        round_to(self.payments.iter().map(|payment| payment.amount).sum(), 2)
    }

    /// Paid invoice totals per client, in client order.
    pub fn revenue_per_client(&self) -> Vec<JoinBucket> {
        let paid = self.invoices.filter(|invoice| invoice.status == InvoiceStatus::Paid);
        join_totals(
            paid,
            |invoice| Some(invoice.client_id.as_str()),
            Invoice::total,
            self.clients.records(),
            |client| client.name.clone(),
            UNKNOWN_CLIENT,
        )
    }

    /// Mean total over invoices that were not cancelled.
    pub fn average_invoice_value(&self) -> f64 {
        round_to(
            average(
                self.invoices
                    .iter()
                    .filter(|invoice| invoice.status != InvoiceStatus::Cancelled)
                    .map(Invoice::total),
            ),
            2,
        )
    }

    pub fn paid_percentage(&self) -> f64 {
        let paid = self
            .invoices
            .filter(|invoice| invoice.status == InvoiceStatus::Paid)
            .len();
        percentage(paid, self.invoices.len())
    }

    pub fn summary(&self) -> InvoicesSummary {
        InvoicesSummary {
            total_invoices: self.invoices.len(),
            invoices_by_status: self.invoices_by_status(),
            outstanding_balance: self.outstanding_balance(),
            total_collected: self.total_collected(),
            average_invoice_value: self.average_invoice_value(),
            paid_percentage: self.paid_percentage(),
            revenue_per_client: self.revenue_per_client(),
        }
    }

    fn next_invoice_number(&self) -> String {
        let highest = self
            .invoices
            .iter()
            .filter_map(|invoice| INVOICE_NUMBER.captures(&invoice.number))
            .filter_map(|captures| captures[1].parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("INV-{:04}", highest.saturating_add(1))
    }

    fn seed_sample_data(&mut self) -> AppResult<()> {
        let northwind = self.clients.create(
            ClientDraft::new("Northwind Traders", "ap@northwind.example").company("Northwind Traders Ltd"),
        )?;
        let bluebird = self
            .clients
            .create(ClientDraft::new("Bluebird Studio", "hello@bluebird.example"))?;

        let today = Utc::now().date_naive();
        let paid = self.create_invoice(
            InvoiceDraft::new(&northwind.id, today - Duration::days(40))
                .item("Website redesign", 1.0, 3200.0)
                .item("Hosting (12 months)", 12.0, 25.0)
                .tax_rate(10.0),
        )?;
        self.invoices
            .set_status(&paid.id, InvoiceStatus::Sent, TransitionPolicy::Unrestricted)?;
        self.record_payment(
            PaymentDraft::new(&paid.id, paid.total(), today - Duration::days(20)).reference("WIRE-5521"),
        )?;

        let overdue = self.create_invoice(
            InvoiceDraft::new(&bluebird.id, today - Duration::days(45))
                .item("Brand workshop", 2.0, 650.0)
                .tax_rate(5.0),
        )?;
        self.invoices
            .set_status(&overdue.id, InvoiceStatus::Sent, TransitionPolicy::Unrestricted)?;
        self.create_invoice(
            InvoiceDraft::new(&northwind.id, today)
                .item("Monthly retainer", 1.0, 1500.0)
                .notes("Net 30"),
        )?;
        self.mark_overdue(today);
        debug!("invoice sample data seeded");
        Ok(())
    }
}

impl Workspace for InvoicesWorkspace {
    const APP: AppKind = AppKind::Invoices;

    fn snapshot(&self) -> AppResult<ExportBundle> {
        let mut bundle = ExportBundle::new(Self::APP);
        bundle.insert("clients", &self.clients)?;
        bundle.insert("invoices", &self.invoices)?;
        bundle.insert("payments", &self.payments)?;
        Ok(bundle)
    }

    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary> {
        bundle.expect_app(Self::APP)?;
        let clients = bundle.decode::<Client>("clients")?;
        let invoices = bundle.decode::<Invoice>("invoices")?;
        let payments = bundle.decode::<Payment>("payments")?;

        let mut summary = ImportSummary::new(Self::APP);
        if let Some(records) = clients {
            summary.record("clients", records.len());
            self.clients.replace_all(records)?;
        }
        if let Some(records) = invoices {
            summary.record("invoices", records.len());
            self.invoices.replace_all(records)?;
        }
        if let Some(records) = payments {
            summary.record("payments", records.len());
            self.payments.replace_all(records)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ClientDraft, InvoiceDraft, InvoiceStatus, InvoicesWorkspace, PaymentDraft, UNKNOWN_CLIENT,
    };
    use crate::db::Persistence;
    use crate::errors::AppError;
    use crate::models::{StoreSettings, TransitionPolicy};
    use chrono::NaiveDate;
    use serde_json::json;

    fn empty_workspace() -> InvoicesWorkspace {
        let settings = StoreSettings {
            seed_sample_data: false,
            ..StoreSettings::default()
        };
        InvoicesWorkspace::open(&Persistence::in_memory(), &settings)
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).expect("valid date")
    }

    fn sent_invoice(workspace: &mut InvoicesWorkspace, client_id: &str) -> super::Invoice {
        let invoice = workspace
            .create_invoice(
                InvoiceDraft::new(client_id, date(1, 1))
                    .due(date(1, 31))
                    .item("Consulting", 10.0, 100.0)
                    .item("Travel", 1.0, 250.0)
                    .tax_rate(20.0),
            )
            .expect("invoice");
        workspace
            .set_invoice_status(&invoice.id, InvoiceStatus::Sent, TransitionPolicy::Enforced)
            .expect("sent")
    }

    #[test]
    fn totals_include_tax() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let invoice = sent_invoice(&mut workspace, &client.id);
        assert_eq!(invoice.subtotal(), 1250.0);
        assert_eq!(invoice.tax(), 250.0);
        assert_eq!(invoice.total(), 1500.0);
        assert_eq!(invoice.number, "INV-0001");
    }

    #[test]
    fn invoice_needs_client_items_and_unique_number() {
        let mut workspace = empty_workspace();
        let missing_client = workspace
            .create_invoice(InvoiceDraft::new("client-1", date(1, 1)).item("X", 1.0, 1.0))
            .expect_err("unknown client");
        assert!(missing_client.to_string().contains("clientId"));

        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let empty = workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)))
            .expect_err("no line items");
        assert!(empty.to_string().contains("lineItems"));

        workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).number("INV-0042").item("X", 1.0, 1.0))
            .expect("custom number");
        assert!(workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).number("INV-0042").item("X", 1.0, 1.0))
            .is_err());
        let next = workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).item("X", 1.0, 1.0))
            .expect("auto number");
        assert_eq!(next.number, "INV-0043");
    }

    #[test]
    fn editing_number_cannot_collide_with_another_invoice() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let first = workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).item("X", 1.0, 1.0))
            .expect("first");
        let second = workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).item("Y", 1.0, 1.0))
            .expect("second");
        assert_eq!(first.number, "INV-0001");
        assert_eq!(second.number, "INV-0002");

        let error = workspace
            .update_invoice(&second.id, json!({ "number": " INV-0001 " }), TransitionPolicy::Unrestricted)
            .expect_err("duplicate number");
        match error {
            AppError::Validation(errors) => assert_eq!(errors.fields(), vec!["number"]),
            other => panic!("unexpected error {other}"),
        }
        let stored = workspace.invoices().find(&second.id).expect("invoice");
        assert_eq!(stored.number, "INV-0002");

        let kept = workspace
            .update_invoice(
                &first.id,
                json!({ "number": "INV-0001", "notes": "same number" }),
                TransitionPolicy::Unrestricted,
            )
            .expect("own number");
        assert_eq!(kept.number, "INV-0001");
        let renamed = workspace
            .update_invoice(&second.id, json!({ "number": " INV-0100 " }), TransitionPolicy::Unrestricted)
            .expect("free number");
        assert_eq!(renamed.number, "INV-0100");
    }

    #[test]
    fn status_patch_follows_invoice_lifecycle_when_enforced() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let invoice = workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).item("X", 1.0, 1.0))
            .expect("invoice");

        let skipped = workspace
            .update_invoice(&invoice.id, json!({ "status": "paid" }), TransitionPolicy::Enforced)
            .expect_err("draft cannot jump to paid");
        assert!(matches!(skipped, AppError::InvalidTransition { .. }));
        assert_eq!(
            workspace.invoices().find(&invoice.id).map(|invoice| invoice.status),
            Some(InvoiceStatus::Draft)
        );

        let sent = workspace
            .update_invoice(&invoice.id, json!({ "status": "sent" }), TransitionPolicy::Enforced)
            .expect("draft -> sent");
        assert_eq!(sent.status, InvoiceStatus::Sent);
    }

    #[test]
    fn full_payment_marks_invoice_paid() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let invoice = sent_invoice(&mut workspace, &client.id);

        workspace
            .record_payment(PaymentDraft::new(&invoice.id, 1000.0, date(1, 10)))
            .expect("partial");
        assert_eq!(workspace.balance_due(&invoice.id), 500.0);
        assert_eq!(workspace.outstanding_balance(), 500.0);
        assert!(workspace
            .record_payment(PaymentDraft::new(&invoice.id, 600.0, date(1, 15)))
            .is_err());
        assert_eq!(workspace.payments().len(), 1);

        workspace
            .record_payment(PaymentDraft::new(&invoice.id, 500.0, date(1, 20)))
            .expect("rest");
        let stored = workspace.invoices().find(&invoice.id).expect("invoice");
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(workspace.outstanding_balance(), 0.0);
        assert_eq!(workspace.paid_percentage(), 100.0);

        assert!(workspace
            .record_payment(PaymentDraft::new(&invoice.id, 1.0, date(1, 21)))
            .is_err());
    }

    #[test]
    fn draft_invoice_rejects_payments() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let draft = workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).item("X", 1.0, 10.0))
            .expect("invoice");
        assert!(workspace
            .record_payment(PaymentDraft::new(&draft.id, 10.0, date(1, 2)))
            .is_err());
        assert!(workspace
            .record_payment(PaymentDraft::new("invoice-1", 10.0, date(1, 2)))
            .expect_err("missing invoice")
            .is_not_found());
    }

    #[test]
    fn mark_overdue_moves_only_past_due_sent_invoices() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let late = sent_invoice(&mut workspace, &client.id);
        workspace
            .create_invoice(InvoiceDraft::new(&client.id, date(1, 1)).due(date(1, 2)).item("X", 1.0, 1.0))
            .expect("draft stays draft");

        assert_eq!(workspace.mark_overdue(date(1, 31)), 0);
        assert_eq!(workspace.mark_overdue(date(2, 1)), 1);
        assert_eq!(workspace.mark_overdue(date(2, 1)), 0);
        let stored = workspace.invoices().find(&late.id).expect("invoice");
        assert_eq!(stored.status, InvoiceStatus::Overdue);
    }

    #[test]
    fn deleting_invoice_removes_payments_and_client_leaves_placeholder() {
        let mut workspace = empty_workspace();
        let client = workspace
            .create_client(ClientDraft::new("Acme", "billing@acme.example"))
            .expect("client");
        let first = sent_invoice(&mut workspace, &client.id);
        let second = sent_invoice(&mut workspace, &client.id);
        workspace
            .record_payment(PaymentDraft::new(&first.id, 1500.0, date(1, 5)))
            .expect("payment");
        workspace
            .record_payment(PaymentDraft::new(&second.id, 100.0, date(1, 5)))
            .expect("payment");

        assert!(workspace.delete_invoice(&second.id));
        assert_eq!(workspace.payments().len(), 1);

        assert!(workspace.delete_client(&client.id));
        assert_eq!(workspace.client_name_for(&first), UNKNOWN_CLIENT);
        let revenue = workspace.revenue_per_client();
        assert_eq!(revenue.len(), 1);
        assert_eq!(revenue[0].label, UNKNOWN_CLIENT);
        assert_eq!(revenue[0].total, 1500.0);
        assert_eq!(workspace.invoice_views()[0].client_name, UNKNOWN_CLIENT);
    }

    #[test]
    fn seeded_invoices_have_one_overdue() {
        let workspace = InvoicesWorkspace::open(&Persistence::in_memory(), &StoreSettings::default());
        let summary = workspace.summary();
        assert_eq!(summary.total_invoices, 3);
        let overdue = summary
            .invoices_by_status
            .iter()
            .find(|entry| entry.category == InvoiceStatus::Overdue)
            .expect("overdue bucket");
        assert_eq!(overdue.count, 1);
        assert_eq!(summary.outstanding_balance, 1365.0);
    }
}
