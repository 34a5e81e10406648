pub const REPORT_BASE_HTML: &str = include_str!("../templates/report_base.html");
