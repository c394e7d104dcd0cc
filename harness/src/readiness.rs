use crate::env::Env;
use crate::error::{self, Error, Result};
use crate::wait::{retry, Await, Budget};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};
use log::{info, warn};
use snafu::ResultExt;
use std::time::Duration;

/// Waits until the Job `name` has at least one successful completion.
pub async fn await_job_succeeded(env: &Env, name: &str, tries: u32, interval: Duration) -> Result<Job> {
    let api = env.api::<Job>();
    let job = retry(&format!("await job '{}'", name), tries, interval, || async {
        let job = api.get(name).await.context(error::KubeSnafu {
            action: format!("get job '{}'", name),
        })?;
        ready_or(job, job_succeeded, name)
    })
    .await?;
    info!("Job '{}' succeeded", name);
    Ok(job)
}

/// Waits until the Deployment `name` reports all replicas available.
pub async fn await_deployment_available(env: &Env, name: &str, within: Duration) -> Result<Deployment> {
    let api = env.api::<Deployment>();
    Await::new(format!("await deployment '{}'", name), Budget::Within(within))
        .run(|| async {
            let deployment = api.get(name).await.context(error::KubeSnafu {
                action: format!("get deployment '{}'", name),
            })?;
            ready_or(deployment, deployment_available, name)
        })
        .await
}

/// Waits until the Service `name` exists and can route traffic.
pub async fn await_service_available(
    env: &Env,
    name: &str,
    tries: u32,
    interval: Duration,
) -> Result<Service> {
    let services = env.api::<Service>();
    let endpoints = env.api::<Endpoints>();
    retry(&format!("await service '{}'", name), tries, interval, || async {
        let service = services.get(name).await.context(error::KubeSnafu {
            action: format!("get service '{}'", name),
        })?;
        if is_load_balancer(&service) {
            return ready_or(service, load_balancer_ready, name);
        }
        let endpoint = endpoints.get(name).await.context(error::KubeSnafu {
            action: format!("get endpoints '{}'", name),
        })?;
        if endpoints_ready(&endpoint) {
            Ok(service)
        } else {
            Err(not_ready(name))
        }
    })
    .await
}

/// Waits until the Pod `name` has its `Ready` condition set.
pub async fn await_pod_ready(env: &Env, name: &str, tries: u32, interval: Duration) -> Result<Pod> {
    let api = env.api::<Pod>();
    retry(&format!("await pod '{}'", name), tries, interval, || async {
        let pod = api.get(name).await.context(error::KubeSnafu {
            action: format!("get pod '{}'", name),
        })?;
        ready_or(pod, pod_ready, name)
    })
    .await
}

/// Waits until the Secret `name` exists.
pub async fn await_secret(env: &Env, name: &str, within: Duration) -> Result<Secret> {
    let api = env.api::<Secret>();
    Await::new(format!("await secret '{}'", name), Budget::Within(within))
        .run(|| async {
            api.get(name).await.context(error::KubeSnafu {
                action: format!("get secret '{}'", name),
            })
        })
        .await
}

/// Logs the output of the setup and init job pods of `release`. Meant for failed installs, so
/// errors are only logged.
pub async fn dump_job_logs(env: &Env, release: &str) {
    let kubectl = env.kubectl();
    for job in [format!("{}-setup", release), format!("{}-init", release)] {
        match kubectl.logs(&format!("job/{}", job)).await {
            Ok(logs) => info!("Logs of job '{}':\n{}", job, logs),
            Err(e) => warn!("Unable to read logs of job '{}': {}", job, e),
        }
    }
}

fn ready_or<T>(object: T, ready: fn(&T) -> bool, name: &str) -> Result<T> {
    if ready(&object) {
        Ok(object)
    } else {
        Err(not_ready(name))
    }
}

fn not_ready(name: &str) -> Error {
    Error::NotReady {
        what: format!("'{}'", name),
    }
}

pub fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.succeeded)
        .unwrap_or_default()
        > 0
}

pub fn deployment_available(deployment: &Deployment) -> bool {
    let wanted = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = match &deployment.status {
        Some(status) => status,
        None => return false,
    };
    let available = status
        .conditions
        .iter()
        .flatten()
        .any(|condition| condition.type_ == "Available" && condition.status == "True");
    available && status.available_replicas.unwrap_or_default() >= wanted
}

pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
        .unwrap_or_default()
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("LoadBalancer")
}

fn load_balancer_ready(service: &Service) -> bool {
    service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| !ingress.is_empty())
        .unwrap_or_default()
}

pub fn endpoints_ready(endpoints: &Endpoints) -> bool {
    endpoints.subsets.iter().flatten().any(|subset| {
        subset
            .addresses
            .as_ref()
            .map(|addresses| !addresses.is_empty())
            .unwrap_or_default()
    })
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_state() {
        let job: Job = serde_json::from_value(json!({
            "metadata": {"name": "certs-job"},
            "status": {"succeeded": 1}
        }))
        .unwrap();
        assert!(job_succeeded(&job));
        let job: Job = serde_json::from_value(json!({
            "metadata": {"name": "certs-job"},
            "status": {"active": 1}
        }))
        .unwrap();
        assert!(!job_succeeded(&job));
    }

    #[test]
    fn pod_state() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "db-postgresql-0"},
            "status": {"conditions": [
                {"type": "Initialized", "status": "True"},
                {"type": "Ready", "status": "True"}
            ]}
        }))
        .unwrap();
        assert!(pod_ready(&pod));
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "db-postgresql-0"},
            "status": {"conditions": [{"type": "Ready", "status": "False"}]}
        }))
        .unwrap();
        assert!(!pod_ready(&pod));
    }

    #[test]
    fn deployment_state() {
        let deployment: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "zitadel-test"},
            "spec": {
                "replicas": 2,
                "selector": {},
                "template": {}
            },
            "status": {
                "availableReplicas": 1,
                "conditions": [{"type": "Available", "status": "True"}]
            }
        }))
        .unwrap();
        assert!(!deployment_available(&deployment));
    }

    #[test]
    fn unready_objects_are_reported_as_not_ready() {
        let job: Job = serde_json::from_value(json!({
            "metadata": {"name": "zitadel-test-setup"},
            "status": {"active": 1}
        }))
        .unwrap();
        let error = ready_or(job, job_succeeded, "zitadel-test-setup").unwrap_err();
        assert!(matches!(error, Error::NotReady { .. }));
        assert_eq!(error.to_string(), "'zitadel-test-setup' is not ready yet");
    }

    #[test]
    fn endpoints_state() {
        let endpoints: Endpoints = serde_json::from_value(json!({
            "metadata": {"name": "db-postgresql"},
            "subsets": [{"addresses": [{"ip": "10.0.0.7"}]}]
        }))
        .unwrap();
        assert!(endpoints_ready(&endpoints));
        let endpoints: Endpoints = serde_json::from_value(json!({
            "metadata": {"name": "db-postgresql"},
            "subsets": [{"notReadyAddresses": [{"ip": "10.0.0.7"}]}]
        }))
        .unwrap();
        assert!(!endpoints_ready(&endpoints));
    }
}
