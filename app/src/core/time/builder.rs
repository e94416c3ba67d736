#[macro_export]
macro_rules! t {
    (now) => {{
        $crate::core::time::DateTime::now()
    }};

    ($from_hour:literal : $from_minute:literal - $to_hour:literal : $to_minute:literal) => {{
        $crate::core::time::DailyTimeRange::new($crate::t!($from_hour:$from_minute), $crate::t!($to_hour:$to_minute))
    }};

    //literal only, invalid values are a programming error
    ($hour:literal : $minute:literal) => {{
        match $crate::core::time::Time::at($hour, $minute) {
            Ok(time) => time,
            Err(e) => panic!("Invalid time literal: {}", e),
        }
    }};

    ($amount:literal millis) => {{
        $crate::core::time::Duration::millis($amount)
    }};
    ($amount:literal seconds) => {{
        $crate::core::time::Duration::seconds($amount)
    }};
    ($amount:literal minutes) => {{
        $crate::core::time::Duration::minutes($amount)
    }};
    ($amount:literal hours) => {{
        $crate::core::time::Duration::hours($amount)
    }};
}
