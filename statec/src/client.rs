use crate::kind::KindDescriptor;

use async_trait::async_trait;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Error as KubeError;
use kube::api::DeleteParams as KubeDeleteParams;
use kube::api::ListParams as KubeListParams;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::core::DynamicObject;

/*
 * ClusterClient is the narrow slice of the cluster API the engine needs:
 * typed-by-descriptor CRUD on arbitrary objects.
 */
#[async_trait]
pub trait ClusterClient: Send + Sync {

    async fn get(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>, KubeError>;

    /*
     * Server-side apply `obj`: creates it when absent, otherwise sets the
     * fields it carries and drops those this client applied before but
     * `obj` no longer has. Fields owned by others are left alone.
     */
    async fn apply(&self, kind: &KindDescriptor, obj: &DynamicObject) -> Result<DynamicObject, KubeError>;

    /*
     * Delete the object, returns true while it still exists afterwards
     * (finalizers, foreground propagation).
     */
    async fn delete(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Result<bool, KubeError>;

    /*
     * List objects of `kind` in every namespace matching `label_selector`.
     */
    async fn list(&self, kind: &KindDescriptor, label_selector: &str) -> Result<Vec<DynamicObject>, KubeError>;
}

fn is_not_found(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(resp) if resp.code == 404)
}

/*
 * KubeClusterClient implements ClusterClient on top of the dynamic API.
 */
#[derive(Clone)]
pub struct KubeClusterClient {
    kube_client: KubeClient,
    field_manager: String,
}

impl KubeClusterClient {

    /*
     * `field_manager` names this client in the managedFields of every
     * object it applies.
     */
    pub fn new(kube_client: KubeClient, field_manager: &str) -> Self {
	Self{
	    kube_client: kube_client,
	    field_manager: field_manager.to_string(),
	}
    }

    fn api(&self, kind: &KindDescriptor, namespace: Option<&str>) -> KubeApi<DynamicObject> {
	let ar = kind.api_resource();
	match namespace {
	    Some(ns) if kind.namespaced => KubeApi::namespaced_with(self.kube_client.clone(), ns, &ar),
	    _ => KubeApi::all_with(self.kube_client.clone(), &ar),
	}
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {

    async fn get(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>, KubeError> {
	self.api(kind, namespace).get_opt(name).await
    }

    async fn apply(&self, kind: &KindDescriptor, obj: &DynamicObject) -> Result<DynamicObject, KubeError> {
	let name = obj.metadata.name.clone().unwrap_or_default();
	/* the desired set is authoritative over fields other managers took */
	let params = KubePatchParams::apply(&self.field_manager).force();
	self.api(kind, obj.metadata.namespace.as_deref()).patch(&name, &params, &KubePatch::Apply(obj)).await
    }

    async fn delete(&self, kind: &KindDescriptor, namespace: Option<&str>, name: &str) -> Result<bool, KubeError> {
	let opts = KubeDeleteParams::background();
	match self.api(kind, namespace).delete(name, &opts).await {
	    /* left: the object is still there, being deleted */
	    Ok(deleted) => Ok(deleted.is_left()),
	    Err(err) if is_not_found(&err) => Ok(false),
	    Err(err) => Err(err),
	}
    }

    async fn list(&self, kind: &KindDescriptor, label_selector: &str) -> Result<Vec<DynamicObject>, KubeError> {
	let params = KubeListParams::default().labels(label_selector);
	let ar = kind.api_resource();
	let api: KubeApi<DynamicObject> = KubeApi::all_with(self.kube_client.clone(), &ar);

	match api.list(&params).await {
	    Ok(list) => Ok(list.items),
	    /* the kind is not served by this cluster (CRD not installed) */
	    Err(err) if is_not_found(&err) => {
		log::debug!("Kind {} is not served, nothing to list", kind.kind);
		Ok(vec![])
	    },
	    Err(err) => Err(err),
	}
    }
}
