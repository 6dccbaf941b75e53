/// 响应缓存键前缀
pub const RESPONSE_KEY_PREFIX: &str = "cache:";

/// 统计接口缓存前缀
pub const STATS_PREFIX: &str = "cache:/api/stats";

/// 空投列表及其子路径缓存前缀
pub const AIRDROPS_PREFIX: &str = "cache:/api/airdrops";

/// 空投增删改成功后需要失效的前缀
pub const AIRDROP_INVALIDATION_PREFIXES: &[&str] = &[STATS_PREFIX, AIRDROPS_PREFIX];

/// 由完整路径和查询串生成缓存键
pub fn response_key(path_and_query: &str) -> String {
    format!("{}{}", RESPONSE_KEY_PREFIX, path_and_query)
}

/// 筛选出以任一前缀开头的键
pub fn matching_keys<I, P>(keys: I, prefixes: &[P]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    P: AsRef<str>,
{
    keys.into_iter()
        .filter(|key| prefixes.iter().any(|prefix| key.starts_with(prefix.as_ref())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_keeps_query_string() {
        assert_eq!(
            response_key("/api/airdrops?page=2&limit=50"),
            "cache:/api/airdrops?page=2&limit=50"
        );
    }

    #[test]
    fn matches_by_prefix_only() {
        let keys = vec![
            "cache:/api/airdrops?page=1".to_string(),
            "cache:/api/airdrops".to_string(),
            "cache:/api/stats".to_string(),
            "cache:/api/health".to_string(),
            "other:/api/airdrops".to_string(),
        ];
        let mut matched = matching_keys(keys, AIRDROP_INVALIDATION_PREFIXES);
        matched.sort();
        assert_eq!(
            matched,
            vec![
                "cache:/api/airdrops".to_string(),
                "cache:/api/airdrops?page=1".to_string(),
                "cache:/api/stats".to_string(),
            ]
        );
    }
}
