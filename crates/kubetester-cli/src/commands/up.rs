use super::{json_pretty, spin_fail, spin_ok, spinner, Context, EXIT_SUCCESS};
use tracing::debug;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let session = ctx.open()?;
    let orch = &session.orchestrator;
    let name = orch.config().name.clone();
    debug!(state = %session.state_path.display(), "bringing up '{name}'");

    let pb = (!ctx.json).then(|| spinner(&format!("bringing up '{name}'...")));
    let result = orch.up();

    if let Some(pb) = &pb {
        match &result {
            Ok(()) => spin_ok(pb, &format!("'{name}' is up")),
            Err(e) if e.is_interrupted() => spin_fail(pb, "interrupted"),
            Err(_) => spin_fail(pb, "up failed"),
        }
    }

    if ctx.json {
        let payload = serde_json::json!({
            "name": name,
            "status": if result.is_ok() { "up" } else { "failed" },
            "error": result.as_ref().err().map(ToString::to_string),
            "state_file": session.state_path.display().to_string(),
            "journal": orch.journal(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", orch.journal_summary());
    }

    result.map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}
