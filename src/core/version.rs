use std::cmp::Ordering;
use std::sync::Arc;

/// 版本 token 全序比较器。
///
/// token 本身不透明（string）：调用方不得假设字典序或数值序，
/// 只能通过注入的比较器建立全序。
pub type VersionComparator = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// 数值比较器：token 按 u64 解析；解析失败的 token 一律小于可解析的，
/// 双方都失败时退化为字典序（保证仍是全序）。
pub fn numeric_comparator() -> VersionComparator {
    Arc::new(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    })
}

/// 字典序比较器
pub fn lexical_comparator() -> VersionComparator {
    Arc::new(|a, b| a.cmp(b))
}

/// 取两个可空版本中较大的一个（用于 high-water 推进）
pub fn max_version(
    cmp: &VersionComparator,
    a: Option<String>,
    b: Option<String>,
) -> Option<String> {
    match (a, b) {
        (Some(x), Some(y)) => {
            if cmp(&x, &y) == Ordering::Less {
                Some(y)
            } else {
                Some(x)
            }
        }
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}
