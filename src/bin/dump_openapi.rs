fn main() -> anyhow::Result<()> {
    let doc = role_gate::docs::build_openapi(8000);
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
