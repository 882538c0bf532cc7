use std::ops::Deref;

use async_trait::async_trait;

use crate::ingress::ResourceKey;

/// Drives the external state of one resource towards what the resource asks for.
#[async_trait]
pub trait Reconcile {
    type Error: std::error::Error + Send;

    async fn reconcile(&self, key: &ResourceKey) -> Result<(), Self::Error>;
}

#[async_trait]
impl<R, T> Reconcile for T
where
    T: Deref<Target = R> + Send + Sync,
    R: Reconcile + Sync,
{
    type Error = R::Error;

    async fn reconcile(&self, key: &ResourceKey) -> Result<(), Self::Error> {
        self.deref().reconcile(key).await
    }
}
