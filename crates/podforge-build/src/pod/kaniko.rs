use super::secret::{ContainerMounts, KANIKO_REGISTRY_SECRETS, get_registry_secret};
use super::{PodContext, proxy_from_environment, spec_mut};
use crate::error::Result;
use crate::registry::discover_registry_address;
use crate::resources::add_resources_to_volume;
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, Pod, Volume, VolumeMount,
};
use podforge_core::KanikoTask;

pub const KANIKO_CACHE_DIR: &str = "/kaniko/cache";
const KANIKO_CACHE_VOLUME: &str = "kaniko-cache";

/// `<address>/<image>` (レジストリ不明ならイメージ名のみ)
fn destination(address: Option<&str>, image: &str) -> String {
    match address {
        Some(address) => format!("{}/{}", address.trim_end_matches('/'), image),
        None => image.to_string(),
    }
}

pub(crate) fn kaniko_args(task: &KanikoTask, address: Option<&str>) -> Vec<String> {
    let publish = &task.publish;
    let mut args = vec![
        "--dockerfile=Dockerfile".to_string(),
        format!("--context=dir://{}", publish.context_dir),
        format!("--destination={}", destination(address, &publish.image)),
    ];

    if task.verbose {
        args.push("-v=debug".to_string());
    }
    if publish.registry.insecure {
        args.push("--insecure".to_string());
        args.push("--insecure-pull".to_string());
    }
    if task.cache.is_enabled() {
        args.push("--cache=true".to_string());
        if task.cache.persistent_volume_claim.is_some() {
            args.push(format!("--cache-dir={}", KANIKO_CACHE_DIR));
        }
    }
    args.extend(task.additional_flags.iter().cloned());
    args
}

pub(crate) async fn add_kaniko_task_to_pod(
    ctx: &PodContext<'_>,
    task: &KanikoTask,
    pod: &mut Pod,
) -> Result<()> {
    let publish = &task.publish;
    let address = match publish.registry.address() {
        Some(address) => Some(address.to_string()),
        None => discover_registry_address(ctx.cluster).await?,
    };

    let args = kaniko_args(task, address.as_deref());
    let mut mounts = ContainerMounts::default();

    if let Some(secret_name) = publish.registry.secret() {
        let secret = get_registry_secret(
            ctx.cluster,
            ctx.build.namespace(),
            secret_name,
            KANIKO_REGISTRY_SECRETS,
        )
        .await?;
        mounts.add_registry_secret(secret_name, &secret);
    }

    if task.cache.is_enabled()
        && let Some(claim) = &task.cache.persistent_volume_claim
    {
        mounts.volumes.push(Volume {
            name: KANIKO_CACHE_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.volume_mounts.push(VolumeMount {
            name: KANIKO_CACHE_VOLUME.to_string(),
            mount_path: KANIKO_CACHE_DIR.to_string(),
            ..Default::default()
        });
    }

    add_resources_to_volume(
        ctx.cluster,
        &ctx.config.pod_name_prefix,
        ctx.build,
        &publish.context_dir,
        &mut mounts,
    )
    .await?;

    mounts.env.extend(proxy_from_environment());

    let image = task
        .executor_image
        .clone()
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| ctx.config.kaniko_executor_image.clone());

    let container = Container {
        name: task.base.name.to_lowercase(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(args),
        env: Some(mounts.env),
        working_dir: Some(publish.context_dir.clone()),
        volume_mounts: Some(mounts.volume_mounts),
        resources: task.resources.clone(),
        ..Default::default()
    };

    let spec = spec_mut(pod);
    spec.volumes.get_or_insert_with(Vec::new).extend(mounts.volumes);
    spec.containers.push(container);
    Ok(())
}
