use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Kind of reward an offer grants. Serialized as the catalog's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Discount,
    ExclusiveContent,
    PhysicalItem,
    Experience,
    Token,
}

impl fmt::Display for RewardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discount => "discount",
            Self::ExclusiveContent => "exclusive content",
            Self::PhysicalItem => "physical item",
            Self::Experience => "experience",
            Self::Token => "token",
        };
        f.write_str(label)
    }
}

/// One promotional reward and the condition that unlocks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOffer {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub category: RewardCategory,
    #[serde(deserialize_with = "display_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub requirements: Requirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemption_url: Option<String>,
    /// Passed through untouched for integrators that run their own
    /// access-control conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lit_conditions: Option<Vec<Value>>,
}

/// Unlock condition of a [`RewardOffer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    /// Collection the holdings are counted in.
    pub contract_address: String,
    #[serde(
        default,
        deserialize_with = "token_id_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_balance: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<BTreeMap<String, String>>,
}

impl Requirement {
    pub fn for_collection(contract_address: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            ..Self::default()
        }
    }

    pub fn with_token_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.token_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_min_balance(mut self, min_balance: u64) -> Self {
        self.min_balance = Some(min_balance);
        self
    }

    pub fn with_trait(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Token ids the offer is restricted to; empty when unrestricted.
    pub fn required_token_ids(&self) -> &[String] {
        self.token_ids.as_deref().unwrap_or_default()
    }

    pub fn restricts_tokens(&self) -> bool {
        !self.required_token_ids().is_empty()
    }

    pub fn has_traits(&self) -> bool {
        self.traits.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Case-insensitive match of the requirement's collection.
    pub fn targets(&self, contract_address: &str) -> bool {
        self.contract_address
            .trim()
            .eq_ignore_ascii_case(contract_address.trim())
    }
}

/// Holdings of one wallet in one collection at query time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipSnapshot {
    #[serde(rename = "hasNFTs")]
    pub has_nfts: bool,
    pub balance: u64,
    pub token_ids: Vec<String>,
    pub metadata: Vec<Value>,
}

impl OwnershipSnapshot {
    /// The all-false snapshot used whenever the oracle cannot answer.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn holding<I, S>(token_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let token_ids: Vec<String> = token_ids.into_iter().map(Into::into).collect();
        Self {
            has_nfts: !token_ids.is_empty(),
            balance: token_ids.len() as u64,
            metadata: vec![Value::Object(Map::new()); token_ids.len()],
            token_ids,
        }
    }

    pub fn owns(&self, token_id: &str) -> bool {
        self.token_ids.iter().any(|id| id == token_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletIdentity {
    pub address: String,
    pub is_connected: bool,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

impl WalletIdentity {
    pub fn connected(address: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_connected: true,
            provider: provider.into(),
            chain_id: None,
        }
    }

    pub fn with_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    /// A wallet only counts when it is connected and has an address.
    pub fn is_usable(&self) -> bool {
        self.is_connected && !self.address.trim().is_empty()
    }
}

/// A mint (deposit) observed on chain, handed once to the mint callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRecord {
    pub transaction_id: String,
    pub contract_address: String,
    pub token_id: String,
    pub owner: String,
    pub metadata: Map<String, Value>,
    pub observed_at: DateTime<Utc>,
}

/// The subset of a mint that personalization looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintContext {
    pub contract_address: String,
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MintContext {
    pub fn new(contract_address: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            token_id: token_id.into(),
            ..Self::default()
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

impl From<&MintRecord> for MintContext {
    fn from(record: &MintRecord) -> Self {
        Self {
            contract_address: record.contract_address.clone(),
            token_id: record.token_id.clone(),
            owner: Some(record.owner.clone()),
            metadata: record.metadata.clone(),
        }
    }
}

/// Renders a JSON scalar the way a catalog author meant it to be displayed.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn display_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}

fn token_id_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    ids.map(|ids| {
        ids.iter()
            .map(|id| {
                scalar_to_string(id)
                    .ok_or_else(|| serde::de::Error::custom("token id must be a string or number"))
            })
            .collect()
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_parses_catalog_shape() {
        let offer: RewardOffer = serde_json::from_value(json!({
            "id": "r1",
            "title": "20% off merch",
            "description": "Holders get a discount",
            "type": "discount",
            "value": 20,
            "requirements": {
                "contractAddress": "0xABC",
                "tokenIds": [7, "9"],
                "minBalance": 2,
                "traits": {"background": "forest"}
            },
            "redemptionUrl": "https://shop.example/redeem"
        }))
        .unwrap();

        assert_eq!(offer.category, RewardCategory::Discount);
        assert_eq!(offer.value, "20");
        assert_eq!(offer.requirements.required_token_ids(), ["7", "9"]);
        assert_eq!(offer.requirements.min_balance, Some(2));
        assert!(offer.requirements.has_traits());
        assert!(offer.image_url.is_none());
    }

    #[test]
    fn requirement_without_restrictions() {
        let req: Requirement = serde_json::from_value(json!({"contractAddress": "0x1"})).unwrap();
        assert!(!req.restricts_tokens());
        assert!(!req.has_traits());
        assert!(req.targets("0X1"));
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = serde_json::from_value::<RewardCategory>(json!("coupon"));
        assert!(err.is_err());
    }

    #[test]
    fn wallet_without_address_is_not_usable() {
        assert!(!WalletIdentity::connected("  ", "blocto").is_usable());
        let mut wallet = WalletIdentity::connected("0x01", "blocto");
        assert!(wallet.is_usable());
        wallet.is_connected = false;
        assert!(!wallet.is_usable());
    }
}
