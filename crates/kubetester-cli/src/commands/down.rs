use super::{json_pretty, spin_fail, spin_ok, spinner, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let session = ctx.open()?;
    let orch = &session.orchestrator;
    let name = orch.config().name.clone();
    let had_resources = orch.state().anything_created();

    let pb = (!ctx.json).then(|| spinner(&format!("tearing down '{name}'...")));
    let result = orch.down();

    if let Some(pb) = &pb {
        match &result {
            Ok(()) => spin_ok(pb, &format!("'{name}' torn down")),
            Err(_) => spin_fail(pb, "teardown incomplete"),
        }
    }

    if ctx.json {
        let payload = serde_json::json!({
            "name": name,
            "status": if result.is_ok() { "down" } else { "failed" },
            "error": result.as_ref().err().map(ToString::to_string),
            "journal": orch.journal(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if had_resources {
        println!("{}", orch.journal_summary());
    } else {
        println!("nothing to tear down");
    }

    result.map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}
