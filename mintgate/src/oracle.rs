use async_trait::async_trait;

use crate::error::OwnershipQueryError;
use crate::model::OwnershipSnapshot;

/// Answers "what does this wallet hold in this collection".
///
/// The answer is trusted as-is; implementations only translate transport
/// and decoding problems into [`OwnershipQueryError`].
#[async_trait]
pub trait OwnershipOracle: Send + Sync {
    async fn query(
        &self,
        wallet: &str,
        collection: &str,
    ) -> Result<OwnershipSnapshot, OwnershipQueryError>;
}
