/// 清理论文标题，生成可作为文件名的安全字符串
///
/// 只保留字母、数字和空格，去掉尾部空白后把空格替换为下划线，
/// 与下载阶段生成的文件名保持一致，这样各阶段才能相互对应。
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    kept.trim_end().replace(' ', "_")
}
