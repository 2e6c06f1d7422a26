use super::models::Event;

pub const NO_TITLE: &str = "No title";

// Longer short texts are most probably descriptions.
const MAX_USEFUL_SHORT_TEXT_LENGTH: usize = 40;

/// Repairs well-known mistakes broadcasters make in event texts.
///
/// `level` selects how aggressive the repair is.  Level 0 only replaces an
/// empty title and removes line breaks and control characters.
pub fn fix_epg_bugs(event: &mut Event, level: u8) {
    if event.title.as_deref().is_none_or(str::is_empty) {
        tracing::trace!(channel = %event.channel, %event.event_id, "Replaced an empty title");
        event.title = Some(NO_TITLE.to_string());
    }

    if level >= 1 {
        fix_level1(event);
    }
    if level >= 2 {
        fix_level2(event);
    }
    if level >= 3 {
        fix_level3(event);
    }

    fix_always(event);
}

fn fix_level1(event: &mut Event) {
    // Title
    // "Short text". Description
    if event.short_text.is_some() != event.description.is_some() {
        let text = event
            .short_text
            .as_deref()
            .or(event.description.as_deref())
            .unwrap_or_default();
        if let Some(quoted) = text.strip_prefix('"') {
            if let Some((short_text, description)) = quoted.split_once("\".") {
                let short_text = short_text.to_string();
                let description = description.to_string();
                event.short_text = Some(short_text);
                event.description = Some(description);
            }
        }
    }

    // Title
    //  Description
    if event.description.is_none() {
        if let Some(description) = event
            .short_text
            .as_deref()
            .and_then(|text| text.strip_prefix(' '))
        {
            event.description = Some(description.to_string());
            event.short_text = None;
        }
    }

    // Title
    // Title
    if event.short_text.is_some() && event.short_text == event.title {
        event.short_text = None;
    }

    // Title
    // "Short text"[.]
    if let Some(short_text) = event.short_text.as_deref() {
        let unquoted = short_text
            .strip_prefix('"')
            .filter(|_| short_text.len() > 2)
            .filter(|_| short_text.ends_with('"') || short_text.ends_with("\"."));
        if let Some(unquoted) = unquoted {
            let unquoted = match unquoted.rfind('"') {
                Some(pos) => &unquoted[..pos],
                None => unquoted,
            };
            event.short_text = Some(unquoted.to_string());
        }
    }
}

fn fix_level2(event: &mut Event) {
    event.title = event.title.as_deref().and_then(compact_space);
    event.short_text = event.short_text.as_deref().and_then(compact_space);
    event.description = event.description.as_deref().and_then(compact_space);

    // A whole lot of information in the short text and nothing in the
    // description.
    if event.description.is_none() {
        let too_long = event
            .short_text
            .as_deref()
            .is_some_and(|text| text.chars().count() > MAX_USEFUL_SHORT_TEXT_LENGTH);
        if too_long {
            event.description = event.short_text.take();
        }
    }

    if event.short_text.is_some() && event.short_text == event.description {
        let too_long = event
            .short_text
            .as_deref()
            .is_some_and(|text| text.chars().count() > MAX_USEFUL_SHORT_TEXT_LENGTH);
        if too_long {
            event.short_text = None;
        } else {
            event.description = None;
        }
    }

    for text in [
        &mut event.title,
        &mut event.short_text,
        &mut event.description,
    ] {
        if let Some(text) = text.as_mut() {
            if text.contains('`') {
                *text = text.replace('`', "'");
            }
        }
    }
}

fn fix_level3(event: &mut Event) {
    for component in event.components.iter_mut() {
        match component.stream_class {
            1 => {
                let redundant = component.description.as_deref().is_some_and(|desc| {
                    desc.eq_ignore_ascii_case("Video") || desc.eq_ignore_ascii_case("Bildformat")
                });
                if redundant {
                    component.description = None;
                }
                if component.description.is_none() {
                    component.description =
                        video_aspect(component.component_type).map(str::to_string);
                }
            }
            2 => {
                let redundant = component
                    .description
                    .as_deref()
                    .is_some_and(|desc| desc.eq_ignore_ascii_case("Audio"));
                if redundant {
                    component.description = None;
                }
                if component.description.is_none() && component.component_type == 0x05 {
                    component.description = Some("Dolby Digital".to_string());
                }
            }
            _ => (),
        }
    }
}

fn fix_always(event: &mut Event) {
    for text in [&mut event.title, &mut event.short_text] {
        if let Some(text) = text.as_mut() {
            *text = strip_controls(text, ' ');
        }
    }
    if let Some(description) = event.description.as_mut() {
        *description = strip_controls(description, '\n');
    }
    for component in event.components.iter_mut() {
        if let Some(description) = component.description.as_mut() {
            *description = strip_controls(description, ' ');
        }
    }
}

fn video_aspect(component_type: u8) -> Option<&'static str> {
    match component_type {
        0x01 | 0x05 => Some("4:3"),
        0x02 | 0x03 | 0x06 | 0x07 => Some("16:9"),
        0x04 | 0x08 => Some(">16:9"),
        0x09 | 0x0D => Some("HD 4:3"),
        0x0A | 0x0B | 0x0E | 0x0F => Some("HD 16:9"),
        0x0C | 0x10 => Some("HD >16:9"),
        _ => None,
    }
}

// Trims both ends and collapses runs of whitespace into a single character.
// A run containing a line break collapses into the line break.
fn compact_space(text: &str) -> Option<String> {
    let mut result = String::with_capacity(text.len());
    let mut pending: Option<char> = None;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            pending = match pending {
                Some('\n') => Some('\n'),
                _ if c == '\n' => Some('\n'),
                _ => Some(' '),
            };
        } else {
            if let Some(space) = pending.take() {
                result.push(space);
            }
            result.push(c);
        }
    }
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

// Line breaks become `newline`, any other control character is removed.
fn strip_controls(text: &str, newline: char) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' => Some(newline),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}
