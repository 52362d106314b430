use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

use crate::audio::queue::QueuePage;

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PREVIOUS: &str = "music_prev";
    pub const PLAY_PAUSE: &str = "music_play_pause";
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
    pub const REWIND: &str = "music_rewind";
    pub const FORWARD: &str = "music_forward";
    pub const VOLUME_DOWN: &str = "music_volume_down";
    pub const VOLUME_UP: &str = "music_volume_up";
    pub const LOOP_TRACK: &str = "music_loop";
    pub const SHUFFLE: &str = "music_shuffle";
    pub const BASS_BOOST: &str = "music_bass_boost";
    pub const QUEUE: &str = "music_queue";

    /// Prefijo de paginación; el número de página va después de `:`
    pub const QUEUE_PAGE_PREFIX: &str = "queue_page";
}

/// Segundos que mueven los botones de rebobinar/adelantar
pub const SEEK_STEP_SECS: f64 = 10.0;
/// Paso de los botones de volumen
pub const VOLUME_STEP: f32 = 0.1;

/// Acción asociada a un botón del reproductor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ButtonAction {
    Previous,
    PlayPause,
    Skip,
    Stop,
    Seek(f64),
    Volume(f32),
    Loop,
    Shuffle,
    BassBoost,
    Queue,
    QueuePage(usize),
}

impl ButtonAction {
    pub fn parse(custom_id: &str) -> Option<Self> {
        let action = match custom_id {
            button_ids::PREVIOUS => Self::Previous,
            button_ids::PLAY_PAUSE => Self::PlayPause,
            button_ids::SKIP => Self::Skip,
            button_ids::STOP => Self::Stop,
            button_ids::REWIND => Self::Seek(-SEEK_STEP_SECS),
            button_ids::FORWARD => Self::Seek(SEEK_STEP_SECS),
            button_ids::VOLUME_DOWN => Self::Volume(-VOLUME_STEP),
            button_ids::VOLUME_UP => Self::Volume(VOLUME_STEP),
            button_ids::LOOP_TRACK => Self::Loop,
            button_ids::SHUFFLE => Self::Shuffle,
            button_ids::BASS_BOOST => Self::BassBoost,
            button_ids::QUEUE => Self::Queue,
            other => {
                let (prefix, page) = other.split_once(':')?;
                if prefix != button_ids::QUEUE_PAGE_PREFIX {
                    return None;
                }
                Self::QueuePage(page.parse().ok().filter(|p| *p > 0)?)
            }
        };
        Some(action)
    }
}

/// Estado que se refleja en el estilo de los botones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlsState {
    pub paused: bool,
    pub looping: bool,
    pub shuffle: bool,
    pub bass_boost: bool,
}

fn toggle_style(enabled: bool) -> ButtonStyle {
    if enabled {
        ButtonStyle::Success
    } else {
        ButtonStyle::Secondary
    }
}

/// Crea los controles principales del reproductor
pub fn create_player_controls(state: ControlsState) -> Vec<CreateActionRow> {
    let play_pause_emoji = if state.paused { '▶' } else { '⏸' };

    let row1 = CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::PREVIOUS)
            .emoji('⏮')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::PLAY_PAUSE)
            .emoji(play_pause_emoji)
            .style(ButtonStyle::Primary),
        CreateButton::new(button_ids::SKIP)
            .emoji('⏭')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::STOP)
            .emoji('⏹')
            .style(ButtonStyle::Danger),
    ]);

    let row2 = CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::REWIND)
            .label("-10s")
            .emoji('⏪')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::FORWARD)
            .label("+10s")
            .emoji('⏩')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::VOLUME_DOWN)
            .emoji('🔉')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::VOLUME_UP)
            .emoji('🔊')
            .style(ButtonStyle::Secondary),
    ]);

    let row3 = CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::LOOP_TRACK)
            .emoji('🔂')
            .style(toggle_style(state.looping)),
        CreateButton::new(button_ids::SHUFFLE)
            .emoji('🔀')
            .style(toggle_style(state.shuffle)),
        CreateButton::new(button_ids::BASS_BOOST)
            .label("Bass")
            .emoji('🎛')
            .style(toggle_style(state.bass_boost)),
        CreateButton::new(button_ids::QUEUE)
            .label("Cola")
            .emoji('📋')
            .style(ButtonStyle::Secondary),
    ]);

    vec![row1, row2, row3]
}

pub fn queue_page_id(page: usize) -> String {
    format!("{}:{}", button_ids::QUEUE_PAGE_PREFIX, page)
}

/// Crea controles de paginación para la cola
pub fn create_pagination_controls(page: &QueuePage) -> CreateActionRow {
    let current = page.current_page.max(1);
    let total = page.total_pages.max(1);

    let prev_btn = CreateButton::new(queue_page_id(current.saturating_sub(1).max(1)))
        .emoji('◀')
        .style(ButtonStyle::Primary)
        .disabled(current <= 1);

    let next_btn = CreateButton::new(queue_page_id((current + 1).min(total)))
        .emoji('▶')
        .style(ButtonStyle::Primary)
        .disabled(current >= total);

    CreateActionRow::Buttons(vec![prev_btn, next_btn])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_player_buttons() {
        assert_eq!(ButtonAction::parse(button_ids::SKIP), Some(ButtonAction::Skip));
        assert_eq!(
            ButtonAction::parse(button_ids::REWIND),
            Some(ButtonAction::Seek(-10.0))
        );
        assert_eq!(
            ButtonAction::parse(button_ids::VOLUME_UP),
            Some(ButtonAction::Volume(0.1))
        );
        assert_eq!(ButtonAction::parse("close"), None);
    }

    #[test]
    fn test_parse_queue_pages() {
        assert_eq!(
            ButtonAction::parse(&queue_page_id(3)),
            Some(ButtonAction::QueuePage(3))
        );
        assert_eq!(ButtonAction::parse("queue_page:0"), None);
        assert_eq!(ButtonAction::parse("queue_page:x"), None);
        assert_eq!(ButtonAction::parse("other:2"), None);
    }
}
