use async_trait::async_trait;
use serde_json::Value;

use crate::error::OwnershipQueryError;
use crate::flow::cadence;
use crate::flow::client::FlowAccessClient;
use crate::model::{scalar_to_string, OwnershipSnapshot};
use crate::oracle::OwnershipOracle;

const OWNERSHIP_SCRIPT: &str = r#"
import NonFungibleToken from __NFT_STANDARD__
import __ASSET__ from __COLLECTION__

access(all) fun main(address: Address): {String: AnyStruct} {
    let account = getAccount(address)
    let collection = account.capabilities
        .borrow<&{NonFungibleToken.Collection}>(__ASSET__.CollectionPublicPath)

    if collection == nil {
        return {
            "hasNFTs": false,
            "balance": 0,
            "tokenIds": [] as [UInt64],
            "metadata": [] as [AnyStruct]
        }
    }

    let ids = collection!.getIDs()
    let metadata: [AnyStruct] = []
    for id in ids {
        metadata.append({} as {String: AnyStruct})
    }

    return {
        "hasNFTs": ids.length > 0,
        "balance": ids.length,
        "tokenIds": ids,
        "metadata": metadata
    }
}
"#;

/// Ownership oracle backed by a Cadence script run on the Access API.
#[derive(Debug, Clone)]
pub struct FlowOwnershipOracle {
    client: FlowAccessClient,
    nft_standard_address: String,
    asset_type: String,
}

impl FlowOwnershipOracle {
    pub fn new(
        client: FlowAccessClient,
        nft_standard_address: impl Into<String>,
        asset_type: impl Into<String>,
    ) -> Self {
        Self {
            client,
            nft_standard_address: nft_standard_address.into(),
            asset_type: asset_type.into(),
        }
    }

    pub fn script_for(&self, collection: &str) -> String {
        OWNERSHIP_SCRIPT
            .replace("__NFT_STANDARD__", &self.nft_standard_address)
            .replace("__ASSET__", &self.asset_type)
            .replace("__COLLECTION__", collection)
    }
}

#[async_trait]
impl OwnershipOracle for FlowOwnershipOracle {
    async fn query(
        &self,
        wallet: &str,
        collection: &str,
    ) -> Result<OwnershipSnapshot, OwnershipQueryError> {
        let fail = |e: crate::error::FlowError| OwnershipQueryError::new(wallet, collection, e);

        let collection_address = cadence::normalize_address(collection).map_err(fail)?;
        let argument = cadence::address_argument(wallet).map_err(fail)?;
        let result = self
            .client
            .execute_script(&self.script_for(&collection_address), &[argument])
            .await
            .map_err(fail)?;
        Ok(snapshot_from_value(&result))
    }
}

/// Missing or mistyped fields fall back to the all-false values.
pub fn snapshot_from_value(value: &Value) -> OwnershipSnapshot {
    let balance = match value.get("balance") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    let token_ids = value
        .get("tokenIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(scalar_to_string).collect())
        .unwrap_or_default();
    let metadata = value
        .get("metadata")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    OwnershipSnapshot {
        has_nfts: value.get("hasNFTs").and_then(Value::as_bool).unwrap_or(false),
        balance,
        token_ids,
        metadata,
    }
}
