use super::{json_pretty, Context, EXIT_SUCCESS};
use kubetester_config::{AddOnKind, NodeGroupKind};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let config = ctx.load_config()?;
    let provider = ctx.provider_kind(&config);

    let add_ons: Vec<&str> = AddOnKind::ALL
        .iter()
        .copied()
        .filter(|kind| config.add_on_enabled(*kind))
        .map(AddOnKind::as_str)
        .collect();
    let node_groups: Vec<String> = NodeGroupKind::CREATION_ORDER
        .into_iter()
        .filter(|kind| config.node_group(*kind).enable)
        .map(|kind| kind.to_string())
        .collect();

    if ctx.json {
        let payload = serde_json::json!({
            "valid": true,
            "name": config.name,
            "region": config.region,
            "provider": provider,
            "node_groups": node_groups,
            "add_ons": add_ons,
            "gpu_drivers": config.requires_gpu_drivers(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{} is valid", ctx.config_path.display());
        println!("  name:        {}", config.name);
        println!("  region:      {}", config.region);
        println!("  provider:    {provider}");
        if !node_groups.is_empty() {
            println!("  node groups: {}", node_groups.join(", "));
        }
        if add_ons.is_empty() {
            println!("  add-ons:     (none)");
        } else {
            println!("  add-ons:     {}", add_ons.join(", "));
        }
    }
    Ok(EXIT_SUCCESS)
}
