//! Mockaroo field specifications and the describe-to-schema registry.
//!
//! A generation schema is the JSON array Mockaroo expects: one object per
//! column with `name`, `type`, `percentBlank`, an optional `formula` and the
//! type's own options. [`SchemaBuilder`] turns describe metadata into such a
//! schema, using per-object rules for the standard objects we know and the
//! generic field-type mapping for everything else.

use chrono::{Months, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::salesforce::describe::{FieldMeta, ObjectMeta};

/// Upper bound for the truncation formula.
const MAX_TEXT_LENGTH: u32 = 1000;

/// Date format Mockaroo accepts for `Datetime` bounds.
const MOCKAROO_DATE_FORMAT: &str = "%m/%d/%Y";

// ─────────────────────────────────────────────────────────────────────────────
// FieldSpec
// ─────────────────────────────────────────────────────────────────────────────

/// One column of a generation schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    /// 0-100.
    pub percent_blank: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            percent_blank: 0,
            formula: None,
            kind,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// Mockaroo type name, e.g. `Fake Company Name`.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Mockaroo data types used by the generator, with their options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum FieldKind {
    #[serde(rename = "First Name")]
    FirstName,
    #[serde(rename = "Last Name")]
    LastName,
    #[serde(rename = "Full Name")]
    FullName,
    Words { min: u32, max: u32 },
    Sentences { min: u32, max: u32 },
    Number { min: i64, max: i64, decimals: u32 },
    /// Bounds formatted `MM/DD/YYYY`.
    Datetime { min: String, max: String },
    #[serde(rename = "Custom List", rename_all = "camelCase")]
    CustomList {
        values: Vec<String>,
        selection_style: String,
    },
    #[serde(rename = "GUID")]
    Guid,
    #[serde(rename = "Email Address")]
    EmailAddress,
    Phone { format: String },
    #[serde(rename = "URL", rename_all = "camelCase")]
    Url {
        include_host: bool,
        include_path: bool,
        include_protocol: bool,
        include_query_string: bool,
    },
    City,
    State {
        #[serde(rename = "onlyUSPlaces")]
        only_us_places: bool,
    },
    Country { countries: Vec<String> },
    #[serde(rename = "Street Address")]
    StreetAddress,
    #[serde(rename = "Postal Code")]
    PostalCode,
    Latitude,
    Longitude,
    #[serde(rename = "Fake Company Name")]
    FakeCompanyName,
    #[serde(rename = "Catch Phrase")]
    CatchPhrase,
    #[serde(rename = "Job Title")]
    JobTitle,
    #[serde(rename = "DUNS Number")]
    DunsNumber,
    #[serde(rename = "Stock Symbol")]
    StockSymbol,
    Boolean,
    #[serde(rename = "Construction Subcontract Category")]
    ConstructionSubcontractCategory,
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::FirstName => "First Name",
            FieldKind::LastName => "Last Name",
            FieldKind::FullName => "Full Name",
            FieldKind::Words { .. } => "Words",
            FieldKind::Sentences { .. } => "Sentences",
            FieldKind::Number { .. } => "Number",
            FieldKind::Datetime { .. } => "Datetime",
            FieldKind::CustomList { .. } => "Custom List",
            FieldKind::Guid => "GUID",
            FieldKind::EmailAddress => "Email Address",
            FieldKind::Phone { .. } => "Phone",
            FieldKind::Url { .. } => "URL",
            FieldKind::City => "City",
            FieldKind::State { .. } => "State",
            FieldKind::Country { .. } => "Country",
            FieldKind::StreetAddress => "Street Address",
            FieldKind::PostalCode => "Postal Code",
            FieldKind::Latitude => "Latitude",
            FieldKind::Longitude => "Longitude",
            FieldKind::FakeCompanyName => "Fake Company Name",
            FieldKind::CatchPhrase => "Catch Phrase",
            FieldKind::JobTitle => "Job Title",
            FieldKind::DunsNumber => "DUNS Number",
            FieldKind::StockSymbol => "Stock Symbol",
            FieldKind::Boolean => "Boolean",
            FieldKind::ConstructionSubcontractCategory => "Construction Subcontract Category",
        }
    }

    /// Empty column, filled later from the id cache.
    pub fn blank() -> Self {
        FieldKind::Words { min: 0, max: 0 }
    }

    pub fn words() -> Self {
        FieldKind::Words { min: 1, max: 5 }
    }

    pub fn sentences(min: u32, max: u32) -> Self {
        FieldKind::Sentences { min, max }
    }

    pub fn phone() -> Self {
        FieldKind::Phone {
            format: "+# ### ### ####".to_string(),
        }
    }

    pub fn url() -> Self {
        FieldKind::Url {
            include_host: true,
            include_path: true,
            include_protocol: true,
            include_query_string: false,
        }
    }

    pub fn state() -> Self {
        FieldKind::State {
            only_us_places: false,
        }
    }

    pub fn country() -> Self {
        FieldKind::Country {
            countries: Vec::new(),
        }
    }

    pub fn custom_list(values: Vec<String>) -> Self {
        FieldKind::CustomList {
            values,
            selection_style: "random".to_string(),
        }
    }

    pub fn datetime(min: NaiveDate, max: NaiveDate) -> Self {
        FieldKind::Datetime {
            min: min.format(MOCKAROO_DATE_FORMAT).to_string(),
            max: max.format(MOCKAROO_DATE_FORMAT).to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field selection
// ─────────────────────────────────────────────────────────────────────────────

/// True for fields we can write that do not belong to a managed package.
///
/// Managed-package fields carry a namespace prefix, so their API name
/// contains `__` twice (`ns__Field__c`).
pub fn should_generate(field: &FieldMeta) -> bool {
    field.updateable && field.name.matches("__").count() != 2
}

/// Truncation formula for a field with a maximum length, if it has one.
pub fn truncate_formula(length: u32) -> Option<String> {
    (length > 0).then(|| {
        format!(
            "if this.nil? then '' else this[0,{}] end",
            length.min(MAX_TEXT_LENGTH)
        )
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// How a named field of a known object is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Leave the field out of the schema.
    Skip,
    /// Use the type-based mapping.
    Generic,
    /// Use a fixed Mockaroo type.
    Fixed(Template),
}

/// Field shapes used by the per-object rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    FirstName,
    LastName,
    FullName,
    JobTitle,
    FakeCompanyName,
    DunsNumber,
    StockSymbol,
    StreetAddress,
    City,
    State,
    Country,
    PostalCode,
    Latitude,
    Longitude,
    EmailAddress,
    Phone,
    CatchPhrase,
    /// Blank column, filled from the id cache.
    Reference,
    LongText,
    ConstructionSubcontract,
    OpportunityAmount,
    OpenStages,
    CloseDate,
    CompletedDate,
    ActivityDate,
    StartDateTime,
    EndDateTime,
}

/// What happens to fields not listed for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unlisted {
    Generic,
    Skip,
}

struct ObjectRules {
    fields: &'static [(&'static [&'static str], Rule)],
    unlisted: Unlisted,
}

impl ObjectRules {
    fn rule_for(&self, field: &str) -> Rule {
        self.fields
            .iter()
            .find(|(names, _)| names.iter().any(|n| n.eq_ignore_ascii_case(field)))
            .map(|(_, rule)| *rule)
            .unwrap_or(match self.unlisted {
                Unlisted::Generic => Rule::Generic,
                Unlisted::Skip => Rule::Skip,
            })
    }
}

use Rule::{Fixed, Generic, Skip};

const ACCOUNT_RULES: ObjectRules = ObjectRules {
    fields: &[
        (&["RecordTypeId", "IsPartner", "IsCustomerPortal", "ParentId"], Skip),
        (&["Name"], Fixed(Template::FakeCompanyName)),
        (&["DunsNumber"], Fixed(Template::DunsNumber)),
        (&["TickerSymbol"], Fixed(Template::StockSymbol)),
        (
            &["BillingStreet", "ShippingStreet", "PersonMailingStreet", "PersonOtherStreet"],
            Fixed(Template::StreetAddress),
        ),
        (
            &["BillingCity", "ShippingCity", "PersonMailingCity", "PersonOtherCity"],
            Fixed(Template::City),
        ),
        (
            &["BillingState", "ShippingState", "PersonMailingState", "PersonOtherState"],
            Fixed(Template::State),
        ),
        (
            &["BillingCountry", "ShippingCountry", "PersonMailingCountry", "PersonOtherCountry"],
            Fixed(Template::Country),
        ),
        (
            &["BillingLatitude", "ShippingLatitude", "PersonMailingLatitude", "PersonOtherLatitude"],
            Fixed(Template::Latitude),
        ),
        (
            &[
                "BillingLongitude",
                "ShippingLongitude",
                "PersonMailingLongitude",
                "PersonOtherLongitude",
            ],
            Fixed(Template::Longitude),
        ),
        (
            &[
                "BillingPostalCode",
                "ShippingPostalCode",
                "PersonMailingPostalCode",
                "PersonOtherPostalCode",
            ],
            Fixed(Template::PostalCode),
        ),
        (&["FirstName"], Fixed(Template::FirstName)),
        (&["LastName"], Fixed(Template::LastName)),
        (&["PersonEmail"], Fixed(Template::EmailAddress)),
    ],
    unlisted: Unlisted::Generic,
};

const CONTACT_RULES: ObjectRules = ObjectRules {
    fields: &[
        (&["ParentId", "IndividualId", "ReportsToId"], Skip),
        (&["FirstName"], Fixed(Template::FirstName)),
        (&["LastName"], Fixed(Template::LastName)),
        (&["JobTitle", "Title"], Fixed(Template::JobTitle)),
        (&["MailingLatitude", "OtherLatitude"], Fixed(Template::Latitude)),
        (&["MailingLongitude", "OtherLongitude"], Fixed(Template::Longitude)),
        (&["MailingStreet", "OtherStreet"], Fixed(Template::StreetAddress)),
        (&["MailingCity", "OtherCity"], Fixed(Template::City)),
        (&["MailingState", "OtherState"], Fixed(Template::State)),
        (&["MailingCountry", "OtherCountry"], Fixed(Template::Country)),
        (&["MailingPostalCode", "OtherPostalCode"], Fixed(Template::PostalCode)),
    ],
    unlisted: Unlisted::Generic,
};

const LEAD_RULES: ObjectRules = ObjectRules {
    fields: &[(&["Jigsaw", "DandbCompanyId", "IndividualId"], Skip)],
    unlisted: Unlisted::Generic,
};

const CASE_RULES: ObjectRules = ObjectRules {
    fields: &[
        (
            &["EntitlementId", "ParentId", "RecordTypeId", "AccountId", "SourceId"],
            Skip,
        ),
        (&["ContactId"], Fixed(Template::Reference)),
        (&["Subject"], Fixed(Template::CatchPhrase)),
        (&["SuppliedName"], Fixed(Template::FullName)),
        (&["SuppliedEmail"], Fixed(Template::EmailAddress)),
        (&["SuppliedPhone"], Fixed(Template::Phone)),
        (&["SuppliedCompany"], Fixed(Template::FakeCompanyName)),
    ],
    unlisted: Unlisted::Generic,
};

const OPPORTUNITY_RULES: ObjectRules = ObjectRules {
    fields: &[
        (
            &[
                "RecordTypeId",
                "Probability",
                "ForecastCategoryName",
                "Territory2Id",
                "IsExcludedFromTerritory2Filter",
                "SyncedQuoteId",
            ],
            Skip,
        ),
        (&["Name"], Fixed(Template::ConstructionSubcontract)),
        (&["Amount"], Fixed(Template::OpportunityAmount)),
        (&["Description"], Fixed(Template::CatchPhrase)),
        (&["StageName"], Fixed(Template::OpenStages)),
        (&["CloseDate"], Fixed(Template::CloseDate)),
    ],
    unlisted: Unlisted::Generic,
};

const TASK_RULES: ObjectRules = ObjectRules {
    fields: &[
        (&["WhoId", "WhatId"], Fixed(Template::Reference)),
        (&["Description"], Fixed(Template::LongText)),
        (&["CompletedDateTime"], Fixed(Template::CompletedDate)),
        (
            &["Priority", "ActivityDate", "Status", "Subject", "CallType", "Type", "OwnerId"],
            Generic,
        ),
    ],
    unlisted: Unlisted::Skip,
};

const EVENT_RULES: ObjectRules = ObjectRules {
    fields: &[
        (&["WhoId", "WhatId"], Fixed(Template::Reference)),
        (&["Description"], Fixed(Template::CatchPhrase)),
        (&["ActivityDate"], Fixed(Template::ActivityDate)),
        (&["StartDateTime"], Fixed(Template::StartDateTime)),
        (&["EndDateTime"], Fixed(Template::EndDateTime)),
        (
            &[
                "Priority",
                "Status",
                "Subject",
                "CallType",
                "Type",
                "OwnerId",
                "ShowAs",
                "IsAllDayEvent",
                "Location",
            ],
            Generic,
        ),
    ],
    unlisted: Unlisted::Skip,
};

/// Returns the rules registered for an object, if any.
fn rules_for(object: &str) -> Option<&'static ObjectRules> {
    const REGISTRY: &[(&str, &ObjectRules)] = &[
        ("Account", &ACCOUNT_RULES),
        ("Contact", &CONTACT_RULES),
        ("Lead", &LEAD_RULES),
        ("Case", &CASE_RULES),
        ("Opportunity", &OPPORTUNITY_RULES),
        ("Task", &TASK_RULES),
        ("Event", &EVENT_RULES),
    ];

    REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(object))
        .map(|(_, rules)| *rules)
}

/// True for Account fields that only exist on person accounts.
fn is_person_field(name: &str) -> bool {
    name.starts_with("Person") || name.ends_with("__pc")
}

// ─────────────────────────────────────────────────────────────────────────────
// SchemaBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Builds generation schemas from describe metadata.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    /// Reference day for date ranges.
    today: NaiveDate,
    person_accounts: bool,
}

impl SchemaBuilder {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            person_accounts: false,
        }
    }

    /// Uses the local date as the reference day.
    pub fn for_today() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }

    /// Generate person accounts instead of business accounts.
    pub fn with_person_accounts(mut self, person_accounts: bool) -> Self {
        self.person_accounts = person_accounts;
        self
    }

    /// Builds the schema for an object.
    pub fn build(&self, meta: &ObjectMeta) -> Vec<FieldSpec> {
        let rules = rules_for(&meta.name);
        let is_account = meta.name.eq_ignore_ascii_case("Account");

        let schema: Vec<FieldSpec> = meta
            .fields
            .iter()
            .filter(|field| should_generate(field))
            .filter(|field| !is_account || self.keeps_account_field(&field.name))
            .filter_map(|field| {
                let rule = rules.map_or(Rule::Generic, |r| r.rule_for(&field.name));
                let spec = match rule {
                    Rule::Skip => {
                        debug!("[GEN] Skipping {}.{}", meta.name, field.name);
                        None
                    }
                    Rule::Generic => self.field_spec_for(field),
                    Rule::Fixed(template) => Some(self.from_template(template, field)),
                }?;
                Some(self.with_truncation(spec, field))
            })
            .collect();

        debug!("[GEN] Schema for {} has {} fields", meta.name, schema.len());
        schema
    }

    /// Maps a field to a Mockaroo type by its describe type.
    ///
    /// Returns `None` for id fields and types without a mapping.
    pub fn field_spec_for(&self, field: &FieldMeta) -> Option<FieldSpec> {
        let kind = match field.field_type.as_str() {
            "id" => return None,
            "boolean" => FieldKind::Boolean,
            "string" | "encryptedstring" => {
                if field.external_id || field.unique {
                    FieldKind::Guid
                } else {
                    FieldKind::words()
                }
            }
            "date" | "datetime" => FieldKind::datetime(self.years_from_today(-1), self.years_from_today(1)),
            "reference" => FieldKind::blank(),
            "currency" | "double" | "percent" | "int" => {
                // int fields report digits instead of precision
                let precision = if field.precision > 0 {
                    field.precision
                } else {
                    field.digits
                };
                FieldKind::Number {
                    min: 0,
                    max: (i64::from(precision) * 10 - 1).max(1),
                    decimals: field.scale,
                }
            }
            "email" => FieldKind::EmailAddress,
            "phone" => FieldKind::phone(),
            "picklist" | "multipicklist" => FieldKind::custom_list(field.picklist()),
            "textarea" => FieldKind::sentences(1, 100),
            "url" => FieldKind::url(),
            other => {
                warn!(
                    "[GEN] {} type has not been mapped to a Mockaroo type, skipping {}",
                    other, field.name
                );
                return None;
            }
        };

        Some(FieldSpec::new(&field.name, kind))
    }

    fn from_template(&self, template: Template, field: &FieldMeta) -> FieldSpec {
        let name = field.name.as_str();
        match template {
            Template::FirstName => FieldSpec::new(name, FieldKind::FirstName),
            Template::LastName => FieldSpec::new(name, FieldKind::LastName),
            Template::FullName => FieldSpec::new(name, FieldKind::FullName),
            Template::JobTitle => FieldSpec::new(name, FieldKind::JobTitle),
            Template::FakeCompanyName => FieldSpec::new(name, FieldKind::FakeCompanyName),
            Template::DunsNumber => FieldSpec::new(name, FieldKind::DunsNumber),
            Template::StockSymbol => FieldSpec::new(name, FieldKind::StockSymbol),
            Template::StreetAddress => FieldSpec::new(name, FieldKind::StreetAddress),
            Template::City => FieldSpec::new(name, FieldKind::City),
            Template::State => FieldSpec::new(name, FieldKind::state()),
            Template::Country => FieldSpec::new(name, FieldKind::country()),
            Template::PostalCode => FieldSpec::new(name, FieldKind::PostalCode),
            Template::Latitude => FieldSpec::new(name, FieldKind::Latitude),
            Template::Longitude => FieldSpec::new(name, FieldKind::Longitude),
            Template::EmailAddress => FieldSpec::new(name, FieldKind::EmailAddress),
            Template::Phone => FieldSpec::new(name, FieldKind::phone()),
            Template::CatchPhrase => FieldSpec::new(name, FieldKind::CatchPhrase),
            Template::Reference => FieldSpec::new(name, FieldKind::blank()),
            Template::LongText => FieldSpec::new(name, FieldKind::sentences(1, 100)),
            Template::ConstructionSubcontract => {
                FieldSpec::new(name, FieldKind::ConstructionSubcontractCategory)
            }
            Template::OpportunityAmount => FieldSpec::new(
                name,
                FieldKind::Number {
                    min: 15_000,
                    max: 500_000,
                    decimals: 2,
                },
            ),
            Template::OpenStages => {
                let open: Vec<String> = field
                    .picklist()
                    .into_iter()
                    .filter(|stage| !stage.contains("Closed"))
                    .collect();
                FieldSpec::new(name, FieldKind::custom_list(open))
            }
            Template::CloseDate => FieldSpec::new(
                name,
                FieldKind::datetime(self.today, self.months_from_today(18)),
            ),
            Template::CompletedDate => FieldSpec::new(
                name,
                FieldKind::datetime(self.years_from_today(-1), self.today),
            ),
            // Roughly 70% of activities land in the past.
            Template::ActivityDate => FieldSpec::new(name, self.default_datetime()).with_formula(
                "if random(0,10) <= 7 then Date.today - random(0,365) else Date.today + random(0,365) end",
            ),
            Template::StartDateTime => FieldSpec::new(name, self.default_datetime()).with_formula(
                "if field('IsAllDayEvent') == true then '' else (field('ActivityDate') + random(0.1,0.5)).strftime('%Y-%m-%dT%H:%M:%S.%L%z') end",
            ),
            Template::EndDateTime => FieldSpec::new(name, self.default_datetime()).with_formula(
                "if field('IsAllDayEvent') == false then (date(field('StartDateTime')) + random(30,240)).strftime('%Y-%m-%dT%H:%M:%S.%L%z') else field('StartDateTime') end",
            ),
        }
    }

    fn keeps_account_field(&self, name: &str) -> bool {
        let person_only = is_person_field(name)
            || name.eq_ignore_ascii_case("FirstName")
            || name.eq_ignore_ascii_case("LastName");
        if self.person_accounts {
            !name.eq_ignore_ascii_case("Name")
        } else {
            !person_only
        }
    }

    fn with_truncation(&self, spec: FieldSpec, field: &FieldMeta) -> FieldSpec {
        if spec.formula.is_some() {
            return spec;
        }
        match truncate_formula(field.length) {
            Some(formula) => spec.with_formula(formula),
            None => spec,
        }
    }

    fn default_datetime(&self) -> FieldKind {
        FieldKind::datetime(self.years_from_today(-1), self.years_from_today(1))
    }

    fn years_from_today(&self, years: i32) -> NaiveDate {
        let months = Months::new(years.unsigned_abs() * 12);
        let shifted = if years < 0 {
            self.today.checked_sub_months(months)
        } else {
            self.today.checked_add_months(months)
        };
        shifted.unwrap_or(self.today)
    }

    fn months_from_today(&self, months: u32) -> NaiveDate {
        self.today
            .checked_add_months(Months::new(months))
            .unwrap_or(self.today)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
