use super::secret::{
    BUILDAH_REGISTRY_CONFIG_MAPS, BUILDAH_REGISTRY_SECRETS, ContainerMounts,
    PLAIN_DOCKER_BUILDAH_REGISTRY_SECRET, get_registry_config_map, get_registry_secret,
};
use super::{PodContext, add_container_to_pod, promote_last_init_container, proxy_from_environment, spec_mut};
use crate::error::Result;
use crate::resources::add_resources_to_volume;
use k8s_openapi::api::core::v1::{Container, Pod};
use podforge_core::{Build, BuildahTask};

pub const CERT_DIR: &str = "/etc/containers/certs.d";
const REWRITTEN_AUTH_FILE: &str = "/tmp/.dockercfg";

/// 旧形式の `.dockercfg` を `{"auths": ...}` 形式に包む
const LEGACY_AUTH_PREAMBLE: &str =
    "(echo '{ \"auths\": ' ; cat /buildah/.docker/config.json ; echo \"}\") > /tmp/.dockercfg";

/// `buildah bud` and `buildah push` invocations of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildahCommands {
    pub bud: Vec<String>,
    pub push: Vec<String>,
}

impl BuildahCommands {
    pub(crate) fn new(task: &BuildahTask, image: &str) -> Self {
        let mut bud: Vec<String> = ["buildah", "bud", "--storage-driver=vfs"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if let Some(platform) = task.platform.as_deref().filter(|p| !p.is_empty()) {
            bud.push("--platform".to_string());
            bud.push(platform.to_string());
        }
        bud.extend(
            ["--pull-always", "-f", "Dockerfile", "-t", image, "."]
                .iter()
                .map(|s| s.to_string()),
        );

        let push = vec![
            "buildah".to_string(),
            "push".to_string(),
            "--storage-driver=vfs".to_string(),
            "--digestfile=/dev/termination-log".to_string(),
            image.to_string(),
            format!("docker://{}", image),
        ];

        let mut commands = Self { bud, push };
        if task.verbose {
            commands.insert_flag("--log-level=debug");
        }
        commands
    }

    /// フラグは `buildah <verb>` の直後に置く
    pub(crate) fn insert_flag(&mut self, flag: &str) {
        self.bud.insert(2, flag.to_string());
        self.push.insert(2, flag.to_string());
    }

    fn shell_steps(&self) -> [String; 2] {
        [self.bud.join(" "), self.push.join(" ")]
    }
}

/// `<address>/<image>` when the registry address is set, else the image as given
fn target_image(task: &BuildahTask) -> String {
    match task.publish.registry.address() {
        Some(address) => format!("{}/{}", address.trim_end_matches('/'), task.publish.image),
        None => task.publish.image.clone(),
    }
}

pub(crate) async fn add_buildah_task_to_pod(
    ctx: &PodContext<'_>,
    task: &BuildahTask,
    pod: &mut Pod,
) -> Result<()> {
    let build = ctx.build;
    let registry = &task.publish.registry;
    let mut commands = BuildahCommands::new(task, &target_image(task));
    let mut mounts = ContainerMounts::default();

    if let Some(ca) = registry.ca() {
        let config =
            get_registry_config_map(ctx.cluster, build.namespace(), ca, BUILDAH_REGISTRY_CONFIG_MAPS)
                .await?;
        mounts.add_registry_config_map(ca, &config);
        // 証明書ディレクトリを明示しないとレジストリ名のディレクトリを探しに行く
        commands.insert_flag(&format!("--cert-dir={}", CERT_DIR));
    }

    let mut preamble = None;
    if let Some(secret_name) = registry.secret() {
        let secret =
            get_registry_secret(ctx.cluster, build.namespace(), secret_name, BUILDAH_REGISTRY_SECRETS)
                .await?;
        if secret == PLAIN_DOCKER_BUILDAH_REGISTRY_SECRET {
            preamble = Some(LEGACY_AUTH_PREAMBLE.to_string());
            mounts.add_env("REGISTRY_AUTH_FILE", REWRITTEN_AUTH_FILE);
        }
        mounts.add_registry_secret(secret_name, &secret);
    }

    if registry.insecure {
        commands.insert_flag("--tls-verify=false");
    }

    add_resources_to_volume(
        ctx.cluster,
        &ctx.config.pod_name_prefix,
        build,
        &task.publish.context_dir,
        &mut mounts,
    )
    .await?;

    mounts.env.extend(proxy_from_environment());

    let script = preamble
        .into_iter()
        .chain(commands.shell_steps())
        .collect::<Vec<_>>()
        .join(" && ");

    let image = task
        .executor_image
        .clone()
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| ctx.config.buildah_image.clone());

    let container = Container {
        name: task.base.name.to_lowercase(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![script]),
        env: Some(mounts.env),
        working_dir: Some(Build::context_dir(build.name())),
        volume_mounts: Some(mounts.volume_mounts),
        ..Default::default()
    };

    spec_mut(pod)
        .volumes
        .get_or_insert_with(Vec::new)
        .extend(mounts.volumes);
    add_container_to_pod(build, container, pod);
    promote_last_init_container(pod);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use podforge_core::{BaseTask, PublishTask, RegistrySpec};

    fn task() -> BuildahTask {
        BuildahTask {
            base: BaseTask {
                name: "BuildahTask".to_string(),
            },
            publish: PublishTask {
                context_dir: "/builder/build2/context".to_string(),
                image: "greetings:latest".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_commands() {
        let commands = BuildahCommands::new(&task(), "greetings:latest");
        assert_eq!(
            commands.bud.join(" "),
            "buildah bud --storage-driver=vfs --pull-always -f Dockerfile -t greetings:latest ."
        );
        assert_eq!(
            commands.push.join(" "),
            "buildah push --storage-driver=vfs --digestfile=/dev/termination-log greetings:latest docker://greetings:latest"
        );
    }

    #[test]
    fn test_platform_and_verbose() {
        let mut task = task();
        task.platform = Some("linux/arm64".to_string());
        task.verbose = true;

        let commands = BuildahCommands::new(&task, "greetings:latest");
        assert_eq!(
            commands.bud[..6],
            [
                "buildah",
                "bud",
                "--log-level=debug",
                "--storage-driver=vfs",
                "--platform",
                "linux/arm64"
            ]
        );
        assert_eq!(commands.push[2], "--log-level=debug");
    }

    #[test]
    fn test_target_image() {
        let mut task = task();
        assert_eq!(target_image(&task), "greetings:latest");

        task.publish.registry = RegistrySpec {
            address: Some("registry.local:5000".to_string()),
            ..Default::default()
        };
        assert_eq!(target_image(&task), "registry.local:5000/greetings:latest");
    }
}
