//! # Object Client
//!
//! Access to the one object a controller manages.
//!
//! Reads go to the API server rather than a watch cache: watch events only trigger a
//! cycle, and each cycle acts on the object as the API server has it at that moment.

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Read/write access to one named object
#[async_trait]
pub trait ObjectClient<K>: Send + Sync {
    /// Current state of the object, `None` if it does not exist
    async fn get(&self) -> Result<Option<K>, kube::Error>;

    async fn create(&self, obj: &K) -> Result<K, kube::Error>;

    async fn replace(&self, obj: &K) -> Result<K, kube::Error>;
}

/// [`ObjectClient`] for the object called `name` in the scope of an [`Api`]
#[derive(Clone)]
pub struct NamedApi<K> {
    api: Api<K>,
    name: String,
}

impl<K> Debug for NamedApi<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedApi")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<K> NamedApi<K> {
    pub fn new(api: Api<K>, name: &str) -> Self {
        Self {
            api,
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl<K> ObjectClient<K> for NamedApi<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn get(&self) -> Result<Option<K>, kube::Error> {
        self.api.get_opt(&self.name).await
    }

    async fn create(&self, obj: &K) -> Result<K, kube::Error> {
        self.api.create(&PostParams::default(), obj).await
    }

    async fn replace(&self, obj: &K) -> Result<K, kube::Error> {
        self.api.replace(&self.name, &PostParams::default(), obj).await
    }
}

/// Build the error the API server returns for a failed request
pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
pub(crate) use fake::FakeApi;
