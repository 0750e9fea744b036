use super::{colorize_state, json_pretty, Context, EXIT_SUCCESS};
use kubetester_config::ResourceKind;
use kubetester_store::{FileStateStore, StateDocument, StateStore};

fn created_label(created: bool) -> &'static str {
    if created {
        "created"
    } else {
        "absent"
    }
}

fn print_human(doc: &StateDocument) {
    let state = if doc.up { "up" } else { "down" };
    println!("{}: {}", doc.name, colorize_state(state));
    if let Some(at) = &doc.up_at {
        println!("  up since:  {at}");
    }
    if let Some(at) = &doc.down_at {
        println!("  down at:   {at}");
    }
    if let Some(endpoint) = &doc.cluster.endpoint {
        println!("  endpoint:  {endpoint}");
    }

    println!("resources:");
    for kind in ResourceKind::CREATION_ORDER {
        println!(
            "  {:<16} {}",
            kind.as_str(),
            colorize_state(created_label(doc.resource_created(kind)))
        );
    }
    if !doc.node_groups.is_empty() {
        println!("node groups:");
        for (name, group) in &doc.node_groups {
            let enabled = if group.enabled { "" } else { " (disabled)" };
            println!(
                "  {name:<16} {}{enabled}",
                colorize_state(created_label(group.created))
            );
        }
    }
    let tracked: Vec<_> = doc
        .add_ons
        .iter()
        .filter(|(_, a)| a.enabled || a.created)
        .collect();
    if !tracked.is_empty() {
        println!("add-ons:");
        for (name, add_on) in tracked {
            let enabled = if add_on.enabled { "" } else { " (disabled)" };
            println!(
                "  {name:<28} {}{enabled}",
                colorize_state(created_label(add_on.created))
            );
        }
    }
}

/// Show the recorded state without contacting the provider.
pub fn run(ctx: &Context) -> Result<u8, String> {
    let config = ctx.load_config()?;
    let store = FileStateStore::new(ctx.layout(), &config.name);
    let doc = store
        .load()
        .map_err(|e| format!("state store error: {e}"))?;

    match (doc, ctx.json) {
        (Some(doc), true) => {
            let payload = serde_json::json!({
                "name": doc.name,
                "up": doc.up,
                "state_file": store.path().display().to_string(),
                "state": doc,
            });
            println!("{}", json_pretty(&payload)?);
        }
        (None, true) => {
            let payload = serde_json::json!({
                "name": config.name,
                "up": false,
                "state_file": store.path().display().to_string(),
                "state": null,
            });
            println!("{}", json_pretty(&payload)?);
        }
        (Some(doc), false) => print_human(&doc),
        (None, false) => println!("{}: no state recorded", config.name),
    }
    Ok(EXIT_SUCCESS)
}
