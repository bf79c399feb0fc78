const VERSION_SEGMENTS: usize = 4;
const SEGMENT_DIGITS: usize = 4;

/// 将版本号转换为可比较的整数
///
/// 去掉数字和 `.` 以外的字符后按 `.` 分段，不足 4 段补齐，每段截断或左补零到 4 位后拼接。
/// 例如 `v1.2.3` -> `1000200030000`。超过 i64 范围时取 `i64::MAX`，排在所有正常版本之后。
pub fn version_to_number(version: &str) -> i64 {
    let cleaned: String = version
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut segments: Vec<&str> = cleaned.split('.').collect();
    if segments.len() < VERSION_SEGMENTS {
        segments.resize(VERSION_SEGMENTS, "");
    }

    let digits: String = segments
        .iter()
        .map(|segment| {
            let segment = &segment[..segment.len().min(SEGMENT_DIGITS)];
            format!("{:0>width$}", segment, width = SEGMENT_DIGITS)
        })
        .collect();

    // 只含数字，解析失败只可能是溢出
    digits.parse().unwrap_or(i64::MAX)
}
