//! 不可信输入的校验与清洗。
//!
//! URL 校验在入库前拦截可能导致 SSRF 或 XSS 的链接；文本清洗只是
//! 输出转义之外的额外一层。

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialPlatform {
    Twitter,
    Discord,
    Telegram,
}

impl SocialPlatform {
    fn allows(self, host: &str) -> bool {
        match self {
            SocialPlatform::Twitter => {
                host == "twitter.com"
                    || host == "x.com"
                    || host.ends_with(".twitter.com")
                    || host.ends_with(".x.com")
            }
            SocialPlatform::Discord => {
                host == "discord.gg" || host == "discord.com" || host.ends_with(".discord.com")
            }
            SocialPlatform::Telegram => {
                host == "t.me" || host == "telegram.me" || host.ends_with(".telegram.org")
            }
        }
    }
}

impl FromStr for SocialPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(SocialPlatform::Twitter),
            "discord" => Ok(SocialPlatform::Discord),
            "telegram" => Ok(SocialPlatform::Telegram),
            other => Err(format!("unknown social platform: {}", other)),
        }
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    // 127/8, 10/8, 172.16/12, 192.168/16, 169.254/16, 0.0.0.0
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let first = ip.segments()[0];
    // fc00::/7 唯一本地地址，fe80::/10 链路本地地址
    if (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80 {
        return true;
    }

    // ::ffff:a.b.c.d 按 IPv4 规则检查
    ip.to_ipv4_mapped().is_some_and(is_blocked_ipv4)
}

/// 只允许指向公网主机、不带凭据的 http/https 链接
pub fn is_secure_url(input: &str) -> bool {
    let input = input.trim();
    if input.is_empty() {
        return false;
    }

    let Ok(url) = Url::parse(input) else {
        return false;
    };

    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    // 带用户名或密码的链接常用于钓鱼
    if !url.username().is_empty() || url.password().is_some() {
        return false;
    }

    match url.host() {
        None => false,
        Some(Host::Ipv4(ip)) => !is_blocked_ipv4(ip),
        Some(Host::Ipv6(ip)) => !is_blocked_ipv6(ip),
        Some(Host::Domain(domain)) => {
            let lower = domain.to_ascii_lowercase();
            // 末尾带点的 FQDN 与不带点的解析结果相同
            let host = lower.strip_suffix('.').unwrap_or(&lower);
            !(host.is_empty()
                || host == "localhost"
                || host.ends_with(".localhost")
                || host.contains("..")
                || host.contains('%')
                || host.contains('@'))
        }
    }
}

/// 社交链接为可选字段，空字符串视为合法
pub fn is_social_media_link(input: &str, platform: SocialPlatform) -> bool {
    let input = input.trim();
    if input.is_empty() {
        return true;
    }

    if !is_secure_url(input) {
        return false;
    }

    Url::parse(input)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| platform.allows(&host))
}

/// 去掉尖括号、`javascript:` 和 `onxxx=` 形式的事件处理器，再去除首尾空白
pub fn sanitize_text(input: &str) -> String {
    let without_brackets: String = input.chars().filter(|c| *c != '<' && *c != '>').collect();
    let without_scheme = remove_ignore_case(&without_brackets, "javascript:");
    strip_event_handlers(&without_scheme).trim().to_string()
}

fn remove_ignore_case(input: &str, needle: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        if rest.len() >= needle.len()
            && rest.is_char_boundary(needle.len())
            && rest[..needle.len()].eq_ignore_ascii_case(needle)
        {
            rest = &rest[needle.len()..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// 匹配 on\w+=（忽略大小写），与单词边界无关
fn strip_event_handlers(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        if let Some(len) = event_handler_len(rest) {
            rest = &rest[len..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

fn event_handler_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() < 4 || !bytes[..2].eq_ignore_ascii_case(b"on") {
        return None;
    }
    let name_len = s[2..].chars().take_while(|c| is_word_char(*c)).count();
    if name_len == 0 {
        return None;
    }
    // 单词字符都是 ASCII，字节数等于字符数
    let end = 2 + name_len;
    (bytes.get(end) == Some(&b'=')).then_some(end + 1)
}

/// 简单的邮箱格式检查：local@domain.tld
pub fn is_valid_email(input: &str) -> bool {
    let input = input.trim();
    if input.len() > 254 || input.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = input.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels.last().is_some_and(|tld| tld.len() >= 2)
}
