use crate::output::print_json;
use std::path::Path;

pub fn reload(config: &Path, json: bool) -> anyhow::Result<()> {
    let mut service = super::open_service(config)?;
    let ack = service.reload()?;
    let dir = service.logic_dir().root.clone();
    service.close();

    if json {
        print_json(&ack)?;
    } else {
        println!("{} ({})", ack.message, dir.display());
    }
    Ok(())
}

pub fn cache_age(config: &Path, json: bool) -> anyhow::Result<()> {
    let service = super::open_service(config)?;
    let age = service.cache_age();
    service.close();

    if json {
        print_json(&serde_json::json!({ "cache_age": age }))?;
    } else {
        match age {
            Some(secs) => println!("{secs}s"),
            None => println!("not cached (local logic source)"),
        }
    }
    Ok(())
}
