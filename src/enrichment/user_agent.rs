//! Regex-based user agent classification

use regex::Regex;

use crate::models::EnrichedDevice;

/// Ordered `(pattern, label)` tables; the first match wins
pub struct UserAgentParser {
    browsers: Vec<(Regex, &'static str)>,
    operating_systems: Vec<(Regex, &'static str)>,
    tablet: Regex,
    android: Regex,
    mobile: Regex,
    bot: Regex,
}

impl UserAgentParser {
    pub fn new() -> Result<Self, regex::Error> {
        let browsers = [
            (r"Edg(e|A|iOS)?/", "Edge"),
            (r"OPR/|Opera", "Opera"),
            (r"SamsungBrowser/", "Samsung Internet"),
            (r"Firefox/|FxiOS/", "Firefox"),
            (r"Chrome/|CriOS/", "Chrome"),
            (r"Version/[\d.]+.*Safari/", "Safari"),
            (r"^curl/", "curl"),
            (r"^Wget/", "Wget"),
            (r"(?i)^python-requests/", "Python Requests"),
        ];
        let operating_systems = [
            (r"Windows NT|Windows Phone", "Windows"),
            (r"Android", "Android"),
            (r"iPhone|iPad|iPod", "iOS"),
            (r"Mac OS X|Macintosh", "Mac OS"),
            (r"CrOS", "Chrome OS"),
            (r"Linux", "Linux"),
        ];

        Ok(UserAgentParser {
            browsers: compile(&browsers)?,
            operating_systems: compile(&operating_systems)?,
            tablet: Regex::new(r"iPad|Tablet")?,
            android: Regex::new(r"Android")?,
            mobile: Regex::new(r"Mobile|iPhone|iPod|Android.*Mobile|Windows Phone")?,
            bot: Regex::new(r"(?i)bot|crawler|spider|^curl/|^Wget/|python-requests")?,
        })
    }

    /// Classify a user agent. Unrecognised parts stay `None`.
    pub fn parse(&self, user_agent: &str) -> EnrichedDevice {
        let user_agent = user_agent.trim();
        if user_agent.is_empty() {
            return EnrichedDevice::default();
        }

        let browser = first_match(&self.browsers, user_agent);
        let os = first_match(&self.operating_systems, user_agent);

        let mobile = self.mobile.is_match(user_agent);
        // Android tablets omit the "Mobile" token
        let tablet = self.tablet.is_match(user_agent)
            || (self.android.is_match(user_agent) && !mobile);

        let device_type = if self.bot.is_match(user_agent) {
            Some("bot")
        } else if tablet {
            Some("tablet")
        } else if mobile {
            Some("mobile")
        } else if os.is_some() {
            Some("desktop")
        } else {
            None
        };

        EnrichedDevice {
            browser: browser.map(String::from),
            os: os.map(String::from),
            device_type: device_type.map(String::from),
        }
    }
}

fn compile(table: &[(&str, &'static str)]) -> Result<Vec<(Regex, &'static str)>, regex::Error> {
    table
        .iter()
        .map(|(pattern, label)| Ok((Regex::new(pattern)?, *label)))
        .collect()
}

fn first_match(table: &[(Regex, &'static str)], user_agent: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(pattern, _)| pattern.is_match(user_agent))
        .map(|(_, label)| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> UserAgentParser {
        UserAgentParser::new().unwrap()
    }

    #[test]
    fn test_desktop_chrome() {
        let device = parser().parse(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(device.browser.as_deref(), Some("Chrome"));
        assert_eq!(device.os.as_deref(), Some("Windows"));
        assert_eq!(device.device_type.as_deref(), Some("desktop"));
    }

    #[test]
    fn test_edge_is_not_reported_as_chrome() {
        let device = parser().parse(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        );
        assert_eq!(device.browser.as_deref(), Some("Edge"));
    }

    #[test]
    fn test_iphone_safari() {
        let device = parser().parse(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(device.browser.as_deref(), Some("Safari"));
        assert_eq!(device.os.as_deref(), Some("iOS"));
        assert_eq!(device.device_type.as_deref(), Some("mobile"));
    }

    #[test]
    fn test_ipad_is_tablet() {
        let device = parser().parse(
            "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/16.0 Safari/604.1",
        );
        assert_eq!(device.device_type.as_deref(), Some("tablet"));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parser().parse(""), EnrichedDevice::default());

        let device = parser().parse("something-custom");
        assert!(device.browser.is_none());
        assert!(device.os.is_none());
        assert!(device.device_type.is_none());
    }

    #[test]
    fn test_cli_tools_are_bots() {
        let device = parser().parse("curl/8.4.0");
        assert_eq!(device.browser.as_deref(), Some("curl"));
        assert_eq!(device.device_type.as_deref(), Some("bot"));
    }
}
