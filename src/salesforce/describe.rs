//! sObject describe metadata.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::salesforce::client::SalesforceClient;

/// One picklist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PicklistValue {
    pub value: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub label: Option<String>,
}

/// Field-level metadata as returned by `/sobjects/{Object}/describe`.
///
/// Only the properties the generators and modifiers look at are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMeta {
    pub name: String,
    /// Salesforce field type, e.g. `string`, `reference`, `picklist`.
    #[serde(rename = "type")]
    pub field_type: String,
    pub updateable: bool,
    pub nillable: bool,
    pub unique: bool,
    pub external_id: bool,
    pub length: u32,
    pub precision: u32,
    pub scale: u32,
    pub digits: u32,
    pub reference_to: Vec<String>,
    pub relationship_name: Option<String>,
    pub picklist_values: Vec<PicklistValue>,
}

impl FieldMeta {
    /// Picklist values in describe order.
    pub fn picklist(&self) -> Vec<String> {
        self.picklist_values.iter().map(|p| p.value.clone()).collect()
    }
}

/// Object-level describe result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub fields: Vec<FieldMeta>,
}

impl ObjectMeta {
    /// Case-insensitive field lookup.
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

impl SalesforceClient {
    /// Fetches describe metadata for one sObject.
    ///
    /// # Errors
    ///
    /// - `AppError::RemoteApi` - unknown object or missing permission
    /// - `AppError::DataFormat` - the response is not a describe document
    pub async fn describe_object(&self, object: &str) -> Result<ObjectMeta, AppError> {
        let url = self.data_url(&format!("sobjects/{}/describe", object))?;
        let response = self.get(url).await?;
        let meta: ObjectMeta = response.json()?;

        info!(
            "[SFDC] Described {} ({} fields)",
            meta.name,
            meta.fields.len()
        );
        Ok(meta)
    }
}
