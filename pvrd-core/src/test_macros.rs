macro_rules! utc {
    ($year:expr, $month:expr, $day:expr, $hour:expr, $min:expr) => {
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, $year, $month, $day, $hour, $min, 0)
            .unwrap()
    };
}

macro_rules! candidate {
    ($id:expr, $start_time:expr, $duration:expr) => {{
        let mut candidate = $crate::epg::CandidateEvent::new(
            $crate::models::EventId::from($id as u16),
            Some($start_time),
            $duration,
        );
        candidate.title = Some(format!("Event#{}", $id));
        candidate
    }};
    ($id:expr, $start_time:expr, $duration:expr, $title:expr) => {{
        let mut candidate = candidate!($id, $start_time, $duration);
        candidate.title = Some($title.to_string());
        candidate
    }};
}

macro_rules! event {
    ($channel:expr, $id:expr, $start_time:expr, $duration:expr) => {{
        let mut event = $crate::epg::Event::new(
            $crate::models::EventId::from($id as u16),
            $crate::models::ChannelId::from($channel),
        );
        event.start_time = Some($start_time);
        event.duration = $duration;
        event.title = Some(format!("Event#{}", $id));
        event
    }};
    ($channel:expr, $id:expr, $start_time:expr, $duration:expr, $table_id:expr, $version:expr) => {{
        let mut event = event!($channel, $id, $start_time, $duration);
        event.table_id = $table_id;
        event.version = $version;
        event
    }};
}
