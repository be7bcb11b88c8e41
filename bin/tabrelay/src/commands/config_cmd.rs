use tabrelay_core::{Config, Paths};

pub fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", Paths::new().config_file().display());
}
