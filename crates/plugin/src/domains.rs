//! Which sites the registered plugins understand.

use std::collections::BTreeSet;
use url::Url;

use crate::registry::PluginRegistry;

/// Hosts of every base URL and scanned domain declared by the registered
/// plugins, lowercased, each also without its `www.` prefix. Entries that do
/// not parse as absolute URLs are skipped with a warning.
pub fn known_domains(registry: &PluginRegistry) -> BTreeSet<String> {
    let mut domains = BTreeSet::new();
    for (table_key, plugin) in registry.iter() {
        for entry in plugin.base_urls().iter().chain(plugin.scanned_domains()) {
            let Some(host) = host_of(entry) else {
                tracing::warn!(table_key, entry, "Skipping unparseable plugin domain");
                continue;
            };
            if let Some(bare) = host.strip_prefix("www.") {
                domains.insert(bare.to_string());
            }
            domains.insert(host);
        }
    }
    domains
}

fn host_of(entry: &str) -> Option<String> {
    let url = Url::parse(&entry.to_lowercase()).ok()?;
    url.host_str().filter(|host| !host.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::tests::TestPlugin;
    use crate::plugin::{PluginHandle, PluginKind};
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    #[case("http://www.Baka-Tsuki.org/project/", Some("www.baka-tsuki.org"))]
    #[case("https://royalroad.com", Some("royalroad.com"))]
    #[case("https://example.com:8080/path?q=1", Some("example.com"))]
    #[case("no-scheme.example", None)]
    #[case("", None)]
    fn test_host_of(#[case] entry: &str, #[case] host: Option<&str>) {
        assert_eq!(host_of(entry).as_deref(), host);
    }

    #[test]
    fn test_known_domains() {
        let scraper = TestPlugin {
            base_urls: &["http://www.baka-tsuki.org/"],
            scanned_domains: &["https://WWW.Example.com/feed", "not a url"],
            ..TestPlugin::new("bakatsuki", "baka_tsuki")
        };
        let other = TestPlugin {
            base_urls: &["https://www.wattpad.com", "https://wattpad.com"],
            ..TestPlugin::new("wattpad", "wattpad")
        };
        let registry =
            PluginRegistry::from_plugins(PluginKind::TextScraper, [Arc::new(scraper) as PluginHandle, Arc::new(other) as PluginHandle])
                .unwrap();
        let domains = known_domains(&registry);
        assert_eq!(
            domains.into_iter().collect::<Vec<_>>(),
            [
                "baka-tsuki.org",
                "example.com",
                "wattpad.com",
                "www.baka-tsuki.org",
                "www.example.com",
                "www.wattpad.com",
            ]
        );
    }
}
