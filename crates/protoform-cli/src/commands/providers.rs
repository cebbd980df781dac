//! Provider and enhancer health

use anyhow::Result;
use protoform_gen::providers::{available_providers, create_provider};
use protoform_gen::{create_enhancer, Capability, ProtoformConfig, ProviderStatus};

pub fn run(config: &ProtoformConfig) -> Result<()> {
    println!("Enhancer:");
    match create_enhancer(config) {
        Ok(enhancer) => {
            let status = enhancer
                .health_check()
                .unwrap_or_else(|e| ProviderStatus::Unavailable(e.to_string()));
            println!(
                "  {:<8} {} ({} at {})",
                enhancer.name(),
                status,
                config.enhancer.model,
                config.enhancer.url
            );
        }
        Err(e) => println!("  {}", e),
    }

    println!("\nGeneration providers:");
    for name in available_providers() {
        let mut roles = Vec::new();
        if config.generation.image_provider == name {
            roles.push("image");
        }
        if config.generation.model_provider == name {
            roles.push("model");
        }
        let marker = if roles.is_empty() {
            String::new()
        } else {
            format!("  [{}]", roles.join(", "))
        };

        match create_provider(name, config) {
            Ok(provider) => {
                let status = match provider.health_check() {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("error: {}", e),
                };
                let capabilities: Vec<String> = provider
                    .capabilities()
                    .iter()
                    .map(Capability::to_string)
                    .collect();
                println!(
                    "  {:<8} {}  ({}){}",
                    name,
                    status,
                    capabilities.join(", "),
                    marker
                );
            }
            Err(e) => println!("  {:<8} {}{}", name, e, marker),
        }
    }
    Ok(())
}
