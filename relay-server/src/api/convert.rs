//! 路径参数辅助
//!
//! 全栈统一使用 "table:id" 格式的资源 ID；路径参数两种形式都收。

/// 去掉 "table:" 前缀，返回纯 record key
pub fn strip_table_prefix<'a>(table: &str, id: &'a str) -> &'a str {
    id.strip_prefix(table)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(id)
}
