use std::any::Any;
use std::any::TypeId;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

/*
 * InfoCatalog hands side information (static paths, node topology, ...) to
 * states. Providers are keyed by their type; states look up the providers
 * they need and treat a missing one as an error.
 */
#[derive(Clone, Default)]
pub struct InfoCatalog {
    providers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl InfoCatalog {

    pub fn new() -> Self {
	Self::default()
    }

    /* adding a provider of an already known type replaces it */
    pub fn add<P: Any + Send + Sync>(&mut self, provider: P) {
	self.providers.insert(TypeId::of::<P>(), Arc::new(provider));
    }

    pub fn with<P: Any + Send + Sync>(mut self, provider: P) -> Self {
	self.add(provider);
	self
    }

    pub fn get<P: Any + Send + Sync>(&self) -> Option<&P> {
	self.providers
	    .get(&TypeId::of::<P>())
	    .and_then(|provider| provider.downcast_ref::<P>())
    }

    /*
     * Like get(), but reports the missing provider as a state error.
     */
    pub fn require<P: Any + Send + Sync>(&self) -> Result<&P, crate::Error> {
	self.get::<P>().ok_or(crate::Error::MissingInfo(type_name::<P>()))
    }
}

impl std::fmt::Debug for InfoCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
	f.debug_struct("InfoCatalog")
	    .field("providers", &self.providers.len())
	    .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct StaticPaths {
	cni_bin_dir: String,
    }

    #[derive(Debug, PartialEq)]
    struct NodeCount(usize);

    #[test]
    fn providers_are_keyed_by_type() {
	let catalog = InfoCatalog::new()
	    .with(StaticPaths{ cni_bin_dir: "/opt/cni/bin".to_string() })
	    .with(NodeCount(3));

	assert_eq!(catalog.get::<StaticPaths>().unwrap().cni_bin_dir, "/opt/cni/bin");
	assert_eq!(catalog.get::<NodeCount>(), Some(&NodeCount(3)));
    }

    #[test]
    fn missing_provider_is_an_error() {
	let catalog = InfoCatalog::new();
	assert!(catalog.get::<NodeCount>().is_none());

	let err = catalog.require::<NodeCount>().unwrap_err();
	assert!(matches!(err, crate::Error::MissingInfo(_)));
    }

    #[test]
    fn adding_twice_replaces() {
	let mut catalog = InfoCatalog::new();
	catalog.add(NodeCount(1));
	catalog.add(NodeCount(2));
	assert_eq!(catalog.get::<NodeCount>(), Some(&NodeCount(2)));
    }
}
