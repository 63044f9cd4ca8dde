//! UI Theme Module - color palette and style helpers for the timeline

use ratatui::style::{Color, Modifier, Style};

use ctrlview_core::model::{DeploymentStatus, ScaleRequestState};

/// Color palette tokens for the theme
#[derive(Clone, Debug)]
pub struct Palette {
    /// Panel border color
    pub panel_border: Color,
    /// Primary text color
    pub text: Color,
    /// Dimmed text (secondary info)
    pub text_dim: Color,
    /// Muted text (tertiary info)
    pub text_muted: Color,
    /// Accent color (headers, focus)
    pub accent: Color,
    /// Completed scales and deployments
    pub success: Color,
    /// Pending work
    pub warn: Color,
    /// Failed or cancelled work
    pub error: Color,
    /// Key hint text
    pub key_hint: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    /// VS Code-esque dark theme
    pub fn dark() -> Self {
        Self {
            panel_border: Color::Rgb(60, 60, 60),
            text: Color::Rgb(212, 212, 212),
            text_dim: Color::Rgb(150, 150, 150),
            text_muted: Color::Rgb(100, 100, 100),
            accent: Color::Rgb(79, 193, 255),
            success: Color::Rgb(78, 201, 176),
            warn: Color::Rgb(220, 180, 100),
            error: Color::Rgb(244, 135, 113),
            key_hint: Color::Rgb(206, 145, 120),
        }
    }
}

/// Theme configuration
#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    pub fn scale_style(&self, state: ScaleRequestState) -> Style {
        let color = match state {
            ScaleRequestState::Complete => self.palette.success,
            ScaleRequestState::Pending => self.palette.warn,
            ScaleRequestState::Cancelled => self.palette.error,
        };
        Style::default().fg(color)
    }

    pub fn scale_icon(&self, state: ScaleRequestState) -> &'static str {
        match state {
            ScaleRequestState::Complete => "⇅",
            ScaleRequestState::Pending => "◐",
            ScaleRequestState::Cancelled => "✗",
        }
    }

    pub fn deployment_style(&self, status: DeploymentStatus) -> Style {
        let color = match status {
            DeploymentStatus::Complete => self.palette.success,
            DeploymentStatus::Pending => self.palette.warn,
            DeploymentStatus::Failed => self.palette.error,
        };
        Style::default().fg(color)
    }

    pub fn deployment_icon(&self, status: DeploymentStatus) -> &'static str {
        match status {
            DeploymentStatus::Complete => "●",
            DeploymentStatus::Pending => "◐",
            DeploymentStatus::Failed => "✗",
        }
    }

    /// Style for key hints in footer
    pub fn key_hint_style(&self) -> Style {
        Style::default().fg(self.palette.key_hint)
    }

    pub fn border_style(&self) -> Style {
        Style::default().fg(self.palette.panel_border)
    }

    pub fn text_style(&self) -> Style {
        Style::default().fg(self.palette.text)
    }

    pub fn text_dim_style(&self) -> Style {
        Style::default().fg(self.palette.text_dim)
    }

    pub fn text_muted_style(&self) -> Style {
        Style::default().fg(self.palette.text_muted)
    }

    pub fn error_style(&self) -> Style {
        Style::default().fg(self.palette.error)
    }

    /// Day separators in the timeline
    pub fn date_header_style(&self) -> Style {
        Style::default()
            .fg(self.palette.accent)
            .add_modifier(Modifier::BOLD)
    }

    pub fn title_style(&self) -> Style {
        Style::default()
            .fg(self.palette.text)
            .add_modifier(Modifier::BOLD)
    }
}

static DEFAULT_THEME: std::sync::OnceLock<Theme> = std::sync::OnceLock::new();

/// Get the default theme
pub fn theme() -> &'static Theme {
    DEFAULT_THEME.get_or_init(Theme::default)
}

/// Convenience re-exports for common use cases
pub mod styles {
    use super::*;

    pub fn scale(state: ScaleRequestState) -> Style {
        theme().scale_style(state)
    }

    pub fn scale_icon(state: ScaleRequestState) -> &'static str {
        theme().scale_icon(state)
    }

    pub fn deployment(status: DeploymentStatus) -> Style {
        theme().deployment_style(status)
    }

    pub fn deployment_icon(status: DeploymentStatus) -> &'static str {
        theme().deployment_icon(status)
    }

    pub fn key_hint() -> Style {
        theme().key_hint_style()
    }

    pub fn border() -> Style {
        theme().border_style()
    }

    pub fn text() -> Style {
        theme().text_style()
    }

    pub fn text_dim() -> Style {
        theme().text_dim_style()
    }

    pub fn text_muted() -> Style {
        theme().text_muted_style()
    }

    pub fn error() -> Style {
        theme().error_style()
    }

    pub fn date_header() -> Style {
        theme().date_header_style()
    }

    pub fn title() -> Style {
        theme().title_style()
    }
}
