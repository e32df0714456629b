use crate::aggregate::{
    count_by, count_by_categories, count_by_many, group_average, join_totals, percentage, percentage_breakdown,
    round_to, CategoryCount, CategoryShare, JoinBucket, JoinIndex,
};
use crate::apps::{collection_key, trimmed, Workspace};
use crate::collection::{Collection, Draft, Entity};
use crate::db::Persistence;
use crate::errors::{AppError, AppResult};
use crate::models::{AppKind, ExportBundle, FieldErrors, ImportSummary, StoreSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

pub const SATISFACTION_SCALE: [u8; 5] = [1, 2, 3, 4, 5];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsumerSegment {
    Budget,
    #[default]
    Mainstream,
    Premium,
    Business,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerProfile {
    pub id: String,
    pub name: String,
    pub age: Option<u32>,
    pub segment: ConsumerSegment,
    pub region: String,
    pub interests: Vec<String>,
    pub annual_spend: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerProfileDraft {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub segment: ConsumerSegment,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub annual_spend: f64,
}

impl ConsumerProfileDraft {
    pub fn new(name: impl Into<String>, segment: ConsumerSegment) -> Self {
        Self {
            name: name.into(),
            age: None,
            segment,
            region: String::new(),
            interests: Vec::new(),
            annual_spend: 0.0,
        }
    }

    pub fn age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn interest(mut self, interest: impl Into<String>) -> Self {
        self.interests.push(interest.into());
        self
    }

    pub fn annual_spend(mut self, spend: f64) -> Self {
        self.annual_spend = spend;
        self
    }
}

impl Draft for ConsumerProfileDraft {
    type Output = ConsumerProfile;

    fn build(self, id: String, created_at: DateTime<Utc>) -> ConsumerProfile {
        ConsumerProfile {
            id,
            name: self.name.trim().to_string(),
            age: self.age,
            segment: self.segment,
            region: self.region.trim().to_string(),
            interests: trimmed(self.interests),
            annual_spend: self.annual_spend,
            created_at,
        }
    }
}

impl Entity for ConsumerProfile {
    type Draft = ConsumerProfileDraft;
    const KIND: &'static str = "consumer profile";
    const ID_PREFIX: &'static str = "profile";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.check(self.annual_spend >= 0.0, "annualSpend", "cannot be negative");
        if let Some(age) = self.age {
            errors.check(age <= 120, "age", "must be 120 or less");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorProduct {
    pub id: String,
    pub name: String,
    pub competitor: String,
    pub category: String,
    pub price: f64,
    pub rating: Option<f64>,
    pub features: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorProductDraft {
    pub name: String,
    pub competitor: String,
    pub category: String,
    pub price: f64,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl CompetitorProductDraft {
    pub fn new(
        name: impl Into<String>,
        competitor: impl Into<String>,
        category: impl Into<String>,
        price: f64,
    ) -> Self {
        Self {
            name: name.into(),
            competitor: competitor.into(),
            category: category.into(),
            price,
            rating: None,
            features: Vec::new(),
        }
    }

    pub fn rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }
}

impl Draft for CompetitorProductDraft {
    type Output = CompetitorProduct;

    fn build(self, id: String, created_at: DateTime<Utc>) -> CompetitorProduct {
        CompetitorProduct {
            id,
            name: self.name.trim().to_string(),
            competitor: self.competitor.trim().to_string(),
            category: self.category.trim().to_string(),
            price: self.price,
            rating: self.rating,
            features: trimmed(self.features),
            created_at,
        }
    }
}

impl Entity for CompetitorProduct {
    type Draft = CompetitorProductDraft;
    const KIND: &'static str = "competitor product";
    const ID_PREFIX: &'static str = "product";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        errors.require("competitor", &self.competitor);
        errors.require("category", &self.category);
        errors.check(self.price >= 0.0, "price", "cannot be negative");
        if let Some(rating) = self.rating {
            errors.check((0.0..=5.0).contains(&rating), "rating", "must be between 0 and 5");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponse {
    pub id: String,
    pub product_id: Option<String>,
    pub profile_id: Option<String>,
    /// 1 to 5.
    pub satisfaction: u8,
    /// 0 to 10, the "how likely are you to recommend" answer.
    pub recommend_score: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponseDraft {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    pub satisfaction: u8,
    pub recommend_score: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

impl SurveyResponseDraft {
    pub fn new(satisfaction: u8, recommend_score: u8) -> Self {
        Self {
            product_id: None,
            profile_id: None,
            satisfaction,
            recommend_score,
            comment: None,
        }
    }

    pub fn product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl Draft for SurveyResponseDraft {
    type Output = SurveyResponse;

    fn build(self, id: String, created_at: DateTime<Utc>) -> SurveyResponse {
        SurveyResponse {
            id,
            product_id: self.product_id.filter(|value| !value.trim().is_empty()),
            profile_id: self.profile_id.filter(|value| !value.trim().is_empty()),
            satisfaction: self.satisfaction,
            recommend_score: self.recommend_score,
            comment: self
                .comment
                .map(|comment| comment.trim().to_string())
                .filter(|comment| !comment.is_empty()),
            created_at,
        }
    }
}

impl Entity for SurveyResponse {
    type Draft = SurveyResponseDraft;
    const KIND: &'static str = "survey response";
    const ID_PREFIX: &'static str = "response";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.check(
            SATISFACTION_SCALE.contains(&self.satisfaction),
            "satisfaction",
            "must be between 1 and 5",
        );
        errors.check(self.recommend_score <= 10, "recommendScore", "must be between 0 and 10");
        errors.into_result()
    }
}

/// Net promoter breakdown over all responses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetPromoter {
    pub promoters: usize,
    pub passives: usize,
    pub detractors: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsSummary {
    pub total_profiles: usize,
    pub total_products: usize,
    pub total_responses: usize,
    pub segment_breakdown: Vec<CategoryShare<ConsumerSegment>>,
    pub average_price_per_category: BTreeMap<String, f64>,
    pub net_promoter: NetPromoter,
    pub satisfaction_distribution: Vec<CategoryCount<u8>>,
    pub top_interests: Vec<(String, usize)>,
}

pub struct InsightsWorkspace {
    profiles: Collection<ConsumerProfile>,
    products: Collection<CompetitorProduct>,
    responses: Collection<SurveyResponse>,
}

impl InsightsWorkspace {
    pub fn open(persistence: &Persistence, settings: &StoreSettings) -> Self {
        let mut workspace = Self {
            profiles: Collection::open(persistence.clone(), collection_key(Self::APP, "profiles")),
            products: Collection::open(persistence.clone(), collection_key(Self::APP, "products")),
            responses: Collection::open(persistence.clone(), collection_key(Self::APP, "responses")),
        };
        if workspace.profiles.is_fresh() && workspace.products.is_fresh() && workspace.responses.is_fresh() {
            if settings.seed_sample_data {
                if let Err(error) = workspace.seed_sample_data() {
                    warn!(error = %error, "insights sample data could not be seeded");
                }
            }
            workspace.profiles.persist();
            workspace.products.persist();
            workspace.responses.persist();
        }
        workspace
    }

    pub fn profiles(&self) -> &Collection<ConsumerProfile> {
        &self.profiles
    }

    pub fn products(&self) -> &Collection<CompetitorProduct> {
        &self.products
    }

    pub fn responses(&self) -> &Collection<SurveyResponse> {
        &self.responses
    }

    pub fn create_profile(&mut self, draft: ConsumerProfileDraft) -> AppResult<ConsumerProfile> {
        self.profiles.create(draft)
    }

    /// Creates a profile from fields produced by a structured analysis reply.
    pub fn create_profile_from_fields(
        &mut self,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> AppResult<ConsumerProfile> {
        self.profiles.create_from_json(serde_json::Value::Object(fields))
    }

    pub fn update_profile(&mut self, id: &str, patch: serde_json::Value) -> AppResult<ConsumerProfile> {
        self.profiles.update(id, patch)
    }

    /// Responses keep their answers and become anonymous.
    pub fn delete_profile(&mut self, id: &str) -> bool {
        if !self.profiles.delete(id) {
            return false;
        }
        self.responses.update_where(
            |response| response.profile_id.as_deref() == Some(id),
            |response| response.profile_id = None,
        );
        true
    }

    pub fn create_product(&mut self, draft: CompetitorProductDraft) -> AppResult<CompetitorProduct> {
        self.products.create(draft)
    }

    pub fn update_product(&mut self, id: &str, patch: serde_json::Value) -> AppResult<CompetitorProduct> {
        self.products.update(id, patch)
    }

    /// Responses about a deleted product are kept and grouped under
    /// [`UNKNOWN_PRODUCT`].
    pub fn delete_product(&mut self, id: &str) -> bool {
        self.products.delete(id)
    }

    pub fn create_response(&mut self, draft: SurveyResponseDraft) -> AppResult<SurveyResponse> {
        let mut errors = FieldErrors::new();
        if let Some(product_id) = draft.product_id.as_deref().filter(|id| !id.trim().is_empty()) {
            errors.check(
                self.products.contains(product_id),
                "productId",
                "does not match an existing product",
            );
        }
        if let Some(profile_id) = draft.profile_id.as_deref().filter(|id| !id.trim().is_empty()) {
            errors.check(
                self.profiles.contains(profile_id),
                "profileId",
                "does not match an existing profile",
            );
        }
        errors.into_result()?;
        self.responses.create(draft)
    }

    pub fn delete_response(&mut self, id: &str) -> bool {
        self.responses.delete(id)
    }

    pub fn product_name_for(&self, response: &SurveyResponse) -> String {
        JoinIndex::new(self.products.records()).label(
            response.product_id.as_deref(),
            |product| product.name.clone(),
            UNKNOWN_PRODUCT,
        )
    }

    pub fn segment_breakdown(&self) -> Vec<CategoryShare<ConsumerSegment>> {
        percentage_breakdown(&count_by(self.profiles.records(), |profile| Some(profile.segment)))
    }

    pub fn average_price_per_category(&self) -> BTreeMap<String, f64> {
        group_average(
            self.products.records(),
            |product| Some(product.category.clone()),
            |product| Some(product.price),
        )
        .into_iter()
        .map(|(category, price)| (category, round_to(price, 2)))
        .collect()
    }

    /// Promoters answer 9 or 10, detractors 0 to 6. The score is the
    /// promoter share minus the detractor share.
    pub fn net_promoter(&self) -> NetPromoter {
        let total = self.responses.len();
        let promoters = self.responses.filter(|response| response.recommend_score >= 9).len();
        let detractors = self.responses.filter(|response| response.recommend_score <= 6).len();
        NetPromoter {
            promoters,
            passives: total - promoters - detractors,
            detractors,
            score: round_to(percentage(promoters, total) - percentage(detractors, total), 1),
        }
    }

    pub fn satisfaction_distribution(&self) -> Vec<CategoryCount<u8>> {
        count_by_categories(
            self.responses.records(),
            |response| Some(response.satisfaction),
            &SATISFACTION_SCALE,
        )
    }

    /// Average satisfaction per product, in product order. Responses without a
    /// product or about a deleted one share a trailing bucket.
    pub fn satisfaction_per_product(&self) -> Vec<JoinBucket> {
        join_totals(
            self.responses.records(),
            |response| response.product_id.as_deref(),
            |response| f64::from(response.satisfaction),
            self.products.records(),
            |product| product.name.clone(),
            UNKNOWN_PRODUCT,
        )
    }

    /// Interests ranked by how many profiles list them.
    pub fn top_interests(&self, limit: usize) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> =
            count_by_many(self.profiles.records(), |profile| profile.interests.clone())
                .into_iter()
                .collect();
        ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        ranked.truncate(limit);
        ranked
    }

    pub fn price_gap(&self, product_id: &str) -> AppResult<f64> {
        let product = self
            .products
            .find(product_id)
            .ok_or_else(|| AppError::NotFound(format!("competitor product {} not found", product_id)))?;
        let category_average = self
            .average_price_per_category()
            .get(&product.category)
            .copied()
            .unwrap_or(product.price);
        Ok(round_to(product.price - category_average, 2))
    }

    pub fn summary(&self) -> InsightsSummary {
        InsightsSummary {
            total_profiles: self.profiles.len(),
            total_products: self.products.len(),
            total_responses: self.responses.len(),
            segment_breakdown: self.segment_breakdown(),
            average_price_per_category: self.average_price_per_category(),
            net_promoter: self.net_promoter(),
            satisfaction_distribution: self.satisfaction_distribution(),
            top_interests: self.top_interests(5),
        }
    }

    fn seed_sample_data(&mut self) -> AppResult<()> {
        let maya = self.profiles.create(
            ConsumerProfileDraft::new("Maya (urban professional)", ConsumerSegment::Premium)
                .age(34)
                .region("North")
                .interest("fitness")
                .interest("travel")
                .annual_spend(4200.0),
        )?;
        let theo = self.profiles.create(
            ConsumerProfileDraft::new("Theo (student)", ConsumerSegment::Budget)
                .age(21)
                .region("East")
                .interest("gaming")
                .interest("fitness")
                .annual_spend(650.0),
        )?;
        self.profiles.create(
            ConsumerProfileDraft::new("Greta (small business)", ConsumerSegment::Business)
                .age(46)
                .region("South")
                .interest("productivity")
                .annual_spend(9800.0),
        )?;

        let tracker = self.products.create(
            CompetitorProductDraft::new("PulseBand 3", "Stridewell", "Wearables", 129.0)
                .rating(4.2)
                .feature("heart rate")
                .feature("sleep tracking"),
        )?;
        let watch = self.products.create(
            CompetitorProductDraft::new("Orbit Watch", "Lumen", "Wearables", 249.0)
                .rating(4.5)
                .feature("gps"),
        )?;
        self.products.create(
            CompetitorProductDraft::new("Desk Hub Pro", "Tether", "Accessories", 89.0).rating(3.9),
        )?;

        self.responses.create(
            SurveyResponseDraft::new(5, 10)
                .product(&watch.id)
                .profile(&maya.id)
                .comment("Battery lasts all week"),
        )?;
        self.responses
            .create(SurveyResponseDraft::new(3, 7).product(&tracker.id).profile(&theo.id))?;
        self.responses.create(
            SurveyResponseDraft::new(2, 4)
                .product(&tracker.id)
                .comment("Strap broke after a month"),
        )?;
        debug!("insights sample data seeded");
        Ok(())
    }
}

impl Workspace for InsightsWorkspace {
    const APP: AppKind = AppKind::Insights;

    fn snapshot(&self) -> AppResult<ExportBundle> {
        let mut bundle = ExportBundle::new(Self::APP);
        bundle.insert("profiles", &self.profiles)?;
        bundle.insert("products", &self.products)?;
        bundle.insert("responses", &self.responses)?;
        Ok(bundle)
    }

    fn restore(&mut self, bundle: &ExportBundle) -> AppResult<ImportSummary> {
        bundle.expect_app(Self::APP)?;
        let profiles = bundle.decode::<ConsumerProfile>("profiles")?;
        let products = bundle.decode::<CompetitorProduct>("products")?;
        let responses = bundle.decode::<SurveyResponse>("responses")?;

        let mut summary = ImportSummary::new(Self::APP);
        if let Some(records) = profiles {
            summary.record("profiles", records.len());
            self.profiles.replace_all(records)?;
        }
        if let Some(records) = products {
            summary.record("products", records.len());
            self.products.replace_all(records)?;
        }
        if let Some(records) = responses {
            summary.record("responses", records.len());
            self.responses.replace_all(records)?;
        }
        Ok(summary)
    }
}
