//! Print the effective configuration with secrets masked.

use dotenvy::dotenv;
use myflix_core::config::{Credentials, Settings};

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let settings = Settings::new()?;

    println!("MyFlix configuration");
    println!("  auth method     : {}", settings.telegram_auth_method);
    match settings.credentials() {
        Ok(Credentials::Bot { token }) => println!("  bot token       : {}", mask(&token)),
        Ok(Credentials::User {
            api_id,
            api_hash,
            phone_number,
        }) => {
            println!("  api id          : {api_id}");
            println!("  api hash        : {}", mask(&api_hash));
            println!("  phone number    : {}", mask(&phone_number));
        }
        Err(issue) => println!("  credentials     : {issue}"),
    }
    match settings.channel() {
        Ok(channel) => println!("  channel         : {channel}"),
        Err(issue) => println!("  channel         : {issue}"),
    }
    if let Some(url) = &settings.telegram_api_url {
        println!("  api url         : {url}");
    }
    println!("  listen          : {}", settings.bind_addr());
    println!(
        "  cache           : {} (expires after {}h)",
        settings.cache_file().display(),
        settings.cache_expiry_hours
    );
    println!(
        "  temp dir        : {} (max age {}s)",
        settings.temp_download_dir.display(),
        settings.max_temp_file_age
    );
    println!(
        "  rate limits     : {} (default {}, stream {}, refresh {} per minute)",
        if settings.rate_limit_enabled { "on" } else { "off" },
        settings.max_requests_per_minute,
        settings.stream_requests_per_minute,
        settings.refresh_requests_per_minute
    );
    println!("  categories      : {}", settings.categories().join(", "));

    let issues = settings.validate();
    if issues.is_empty() {
        println!("\n✅ Configuration looks complete");
    } else {
        println!("\n⚠️ {} issue(s):", issues.len());
        for issue in issues {
            println!("  - {issue}");
        }
    }
    Ok(())
}
