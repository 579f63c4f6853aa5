use crate::utils;
use podforge_build::BuildStore;

pub async fn handle(store: &dyn BuildStore, namespace: &str, name: &str, json: bool) -> anyhow::Result<()> {
    let build = store.load(namespace, name).await.map_err(utils::user_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&build)?);
    } else {
        utils::print_build(&build);
    }
    Ok(())
}
