use super::{open_engine, CliResult};

pub async fn run(mode: Option<String>) -> CliResult {
    let (engine, _db) = open_engine()?;
    match mode {
        Some(mode) => {
            let mode = engine.set_pause(&mode).await?;
            println!("pause: {mode}");
        }
        None => println!("pause: {}", engine.pause_mode().await?),
    }
    Ok(())
}
