/// Display formatting for bitcoin and satoshi figures

/// Group the digits of `value` in threes: 1234567 -> "1,234,567"
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Render a decimal with `decimals` places, grouped integer part and
/// trailing zeros trimmed: (1234.5000, 4) -> "1,234.5"
pub fn format_decimal(value: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match fixed.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (fixed.as_str(), ""),
    };

    let mut out = String::new();
    if value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_thousands(integer.parse::<u64>().unwrap_or(0)));
    if !fraction.is_empty() {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

/// "1.2 BTC"
pub fn format_btc(btc: f64, decimals: usize) -> String {
    format!("{} BTC", format_decimal(btc, decimals))
}

/// "50,000 sats", "1 sat", or two decimals below one satoshi
pub fn format_sats(sats: f64) -> String {
    if sats < 1.0 {
        return format!("{} sats", format_decimal(sats, 2));
    }
    let rounded = sats.round() as u64;
    if rounded == 1 {
        return "1 sat".to_string();
    }
    format!("{} sats", group_thousands(rounded))
}

/// Inverse of the display functions: "50,000 sats" -> 50000.0
pub fn parse_display_figure(display: &str) -> Option<f64> {
    let number = display.split_whitespace().next()?;
    number.replace(',', "").parse::<f64>().ok()
}
