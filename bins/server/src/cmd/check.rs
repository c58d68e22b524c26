use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

/// Загрузить конфиг так же, как `serve`, и напечатать результат.
pub fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args)?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ServerError::Config { context: "print", detail: e.to_string() })?;
    println!("{json}");
    println!("authorized users: {}", config.sink.user_set().len());
    Ok(())
}
