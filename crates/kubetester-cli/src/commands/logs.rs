use super::{json_pretty, spin_fail, spin_ok, spinner, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let session = ctx.open_read_only()?;
    let orch = &session.orchestrator;

    let pb = (!ctx.json).then(|| spinner("collecting node group logs..."));
    let result = orch.dump_cluster_logs();
    if let Some(pb) = &pb {
        match &result {
            Ok(()) => spin_ok(pb, "node group logs collected"),
            Err(_) => spin_fail(pb, "log collection failed"),
        }
    }
    result.map_err(|e| e.to_string())?;

    if ctx.json {
        let payload = serde_json::json!({
            "name": orch.config().name,
            "status": "collected",
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
