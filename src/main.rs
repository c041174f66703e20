mod api;
mod citation;
mod config;
mod conversation;
mod pdf;
mod selection;
mod sources;
mod storage;

use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    clipboard,
    keyboard::{self, Key},
    time,
    widget::{
        button, column, container, pick_list, row, scrollable, text, text_input, text_input::Id,
    },
    window::{self},
    Element, Font, Length, Subscription, Task, Theme,
};
use std::time::Duration;

use api::{DeepCiteClient, ModelInfo, PaperSearchResult, WorkspaceInfo};
use citation::{format_citation, BibRecord, CitationStyle};
use conversation::{ChatMode, Conversation, ConversationStore, Role, SendOutcome};
use pdf::PdfDocument;
use pulldown_cmark::{Event as MdEvent, Parser};
use selection::{default_domain_groups, DomainGroup, SelectionState};
use storage::LocalStore;

/// Flatten markdown to display text. The backend's html_content is meant
/// for browser surfaces; in this shell the raw markdown is flattened
/// instead.
fn plain_text(markdown: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(markdown) {
        match event {
            MdEvent::Text(t) | MdEvent::Code(t) => out.push_str(&t),
            MdEvent::SoftBreak | MdEvent::HardBreak => out.push('\n'),
            MdEvent::End(_) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    out.trim_end().to_string()
}

fn main() -> iced::Result {
    env_logger::init();

    let config = config::Config::load();
    let window = window::Settings {
        size: iced::Size::new(config.window.width as f32, config.window.height as f32),
        position: window::Position::Centered,
        ..Default::default()
    };

    iced::application("DeepCite", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window)
        .default_font(Font::MONOSPACE)
        .run_with(move || App::new(config.clone()))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    ChatFinished {
        conversation_id: String,
        request_id: String,
        outcome: SendOutcome,
    },
    ModelsLoaded(Result<Vec<ModelInfo>, String>),
    WorkspacesLoaded(Result<Vec<WorkspaceInfo>, String>),
    NewConversation,
    NewScratchConversation,
    SelectConversation(String),
    DeleteConversation(String),
    SetMode(ChatMode),
    SelectModel(String),
    ToggleSelector,
    ToggleWorkspace(String),
    ToggleDocument(String, String),
    ToggleDomain(String),
    ToggleDomainGroup(usize),
    ApplySelection,
    CitationClicked {
        conversation_id: String,
        message_id: String,
        marker: String,
    },
    InternetCitationClicked {
        conversation_id: String,
        message_id: String,
        index: usize,
    },
    CopyCitation {
        conversation_id: String,
        message_id: String,
        document_id: String,
        style: CitationStyle,
    },
    PdfFetched(Result<PdfDocument, String>),
    ClosePdf,
    DismissError,
    PaperQueryChanged(String),
    SearchPapers,
    PapersFound(Result<PaperSearchResult, String>),
    Tick,
    Exit,
}

struct App {
    client: DeepCiteClient,
    store: ConversationStore,
    selection: SelectionState,
    selector_open: bool,
    domain_groups: Vec<DomainGroup>,
    workspaces: Vec<WorkspaceInfo>,
    models: Vec<ModelInfo>,
    input_text: String,
    paper_query: String,
    paper_results: Option<PaperSearchResult>,
    viewer: Option<PdfDocument>,
    viewer_page: u32,
    pdf_error: Option<String>,
    highlighted_citation: Option<String>,
    loading_frame: usize,
    input_id: Id,
    max_paper_results: usize,
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let client = DeepCiteClient::new(
            &config.backend.base_url,
            config.backend.request_timeout_secs,
        );

        let storage = match LocalStore::open_default() {
            Ok(storage) => storage,
            Err(e) => {
                log::warn!("local store unavailable, conversations will not survive restart: {}", e);
                LocalStore::in_memory().expect("in-memory sqlite")
            }
        };

        let mut store = ConversationStore::new(storage, &config.backend.default_model);
        store.hydrate();
        let selection = store
            .current()
            .map(SelectionState::from_conversation)
            .unwrap_or_default();

        let input_id = Id::unique();

        let models_client = client.clone();
        let models_task = Task::future(async move {
            Message::ModelsLoaded(models_client.list_models().await.map_err(|e| e.to_string()))
        });
        let workspaces_client = client.clone();
        let workspaces_task = Task::future(async move {
            Message::WorkspacesLoaded(
                workspaces_client
                    .list_workspaces()
                    .await
                    .map_err(|e| e.to_string()),
            )
        });

        let app = App {
            client,
            store,
            selection,
            selector_open: false,
            domain_groups: default_domain_groups(),
            workspaces: Vec::new(),
            models: Vec::new(),
            input_text: String::new(),
            paper_query: String::new(),
            paper_results: None,
            viewer: None,
            viewer_page: 1,
            pdf_error: None,
            highlighted_citation: None,
            loading_frame: 0,
            input_id: input_id.clone(),
            max_paper_results: config.backend.max_paper_results,
        };

        let focus_task = text_input::focus(input_id);
        (app, Task::batch([focus_task, models_task, workspaces_task]))
    }

    fn refresh_selection(&mut self) {
        self.selection = self
            .store
            .current()
            .map(SelectionState::from_conversation)
            .unwrap_or_default();
    }

    fn fetch_pdf_task(&self, document_id: String, title: String) -> Task<Message> {
        let client = self.client.clone();
        Task::future(async move {
            Message::PdfFetched(
                client
                    .fetch_document(&document_id, &title)
                    .await
                    .map_err(|e| e.to_string()),
            )
        })
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                let Some(prepared) = self.store.prepare_send(&self.input_text) else {
                    return Task::none();
                };
                self.input_text.clear();
                let client = self.client.clone();
                Task::future(async move {
                    let outcome = client.send_chat(&prepared.request, prepared.token).await;
                    Message::ChatFinished {
                        conversation_id: prepared.conversation_id,
                        request_id: prepared.request_id,
                        outcome,
                    }
                })
            }
            Message::ChatFinished {
                conversation_id,
                request_id,
                outcome,
            } => {
                self.store.finish_send(&conversation_id, &request_id, outcome);
                Task::none()
            }
            Message::ModelsLoaded(Ok(models)) => {
                self.models = models;
                Task::none()
            }
            Message::ModelsLoaded(Err(e)) => {
                log::warn!("could not load model list: {}", e);
                Task::none()
            }
            Message::WorkspacesLoaded(Ok(workspaces)) => {
                self.workspaces = workspaces;
                Task::none()
            }
            Message::WorkspacesLoaded(Err(e)) => {
                log::warn!("could not load workspaces: {}", e);
                Task::none()
            }
            Message::NewConversation => {
                self.store.create_conversation(None, false);
                self.refresh_selection();
                text_input::focus(self.input_id.clone())
            }
            Message::NewScratchConversation => {
                self.store.create_conversation(None, true);
                self.refresh_selection();
                text_input::focus(self.input_id.clone())
            }
            Message::SelectConversation(id) => {
                self.store.select_conversation(&id);
                self.refresh_selection();
                Task::none()
            }
            Message::DeleteConversation(id) => {
                self.store.delete_conversation(&id);
                self.refresh_selection();
                Task::none()
            }
            Message::SetMode(mode) => {
                self.store.set_mode(mode);
                Task::none()
            }
            Message::SelectModel(model_id) => {
                self.store.set_model(&model_id);
                Task::none()
            }
            Message::ToggleSelector => {
                if !self.selector_open {
                    self.refresh_selection();
                }
                self.selector_open = !self.selector_open;
                Task::none()
            }
            Message::ToggleWorkspace(id) => {
                self.selection.toggle_workspace(&id);
                Task::none()
            }
            Message::ToggleDocument(workspace_id, doc_id) => {
                self.selection.toggle_document(&workspace_id, &doc_id);
                Task::none()
            }
            Message::ToggleDomain(domain) => {
                self.selection.toggle_domain(&domain);
                Task::none()
            }
            Message::ToggleDomainGroup(index) => {
                if let Some(group) = self.domain_groups.get(index).cloned() {
                    self.selection.toggle_group(&group);
                }
                Task::none()
            }
            Message::ApplySelection => {
                if let Some(conversation) = self.store.current_mut() {
                    self.selection.apply(conversation);
                }
                self.store.set_domains(self.selection.selected_domains());
                self.selector_open = false;
                Task::none()
            }
            Message::CitationClicked {
                conversation_id,
                message_id,
                marker,
            } => {
                self.highlighted_citation = Some(marker.clone());
                let Some(message) = self
                    .store
                    .conversation(&conversation_id)
                    .and_then(|c| c.messages.iter().find(|m| m.id == message_id))
                else {
                    return Task::none();
                };
                let groups = sources::group_results(&message.search_results);
                let Some(target) = sources::resolve_marker(&marker, &groups) else {
                    return Task::none();
                };
                let title = groups
                    .iter()
                    .find(|g| g.document.id == target.document_id)
                    .map(|g| g.document.title.clone())
                    .unwrap_or_default();
                self.viewer_page = target.page;
                self.fetch_pdf_task(target.document_id, title)
            }
            Message::InternetCitationClicked {
                conversation_id,
                message_id,
                index,
            } => {
                let Some(message) = self
                    .store
                    .conversation(&conversation_id)
                    .and_then(|c| c.messages.iter().find(|m| m.id == message_id))
                else {
                    return Task::none();
                };
                let Some(citation) = message.formatted_citations.iter().find(|c| c.index == index)
                else {
                    return Task::none();
                };
                self.highlighted_citation = Some(format!("[{}]", citation.index));
                let Some(result) =
                    sources::resolve_internet_citation(citation, &message.search_results)
                else {
                    return Task::none();
                };
                self.viewer_page = match result.page {
                    Some(p) if p > 0 => p as u32,
                    _ => 1,
                };
                self.fetch_pdf_task(result.document.id.clone(), result.document.title.clone())
            }
            Message::CopyCitation {
                conversation_id,
                message_id,
                document_id,
                style,
            } => {
                let record = self
                    .store
                    .conversation(&conversation_id)
                    .and_then(|c| c.messages.iter().find(|m| m.id == message_id))
                    .and_then(|m| {
                        m.search_results
                            .iter()
                            .find(|r| r.document.id == document_id)
                    })
                    .map(|r| BibRecord {
                        id: r.document.id.clone(),
                        title: r.document.title.clone(),
                        authors: r
                            .document
                            .authors
                            .clone()
                            .map(|a| a.join(", "))
                            .unwrap_or_default(),
                        year: r.document.year,
                        ..Default::default()
                    });
                match record {
                    Some(record) => clipboard::write(format_citation(&record, style)),
                    None => Task::none(),
                }
            }
            Message::PdfFetched(Ok(document)) => {
                self.pdf_error = None;
                self.viewer = Some(document);
                Task::none()
            }
            Message::PdfFetched(Err(e)) => {
                self.pdf_error = Some(e);
                Task::none()
            }
            Message::ClosePdf => {
                // Drops the byte buffer with it; nothing else holds a
                // reference once the viewer closes.
                self.viewer = None;
                Task::none()
            }
            Message::DismissError => {
                self.store.clear_error();
                self.pdf_error = None;
                Task::none()
            }
            Message::PaperQueryChanged(value) => {
                self.paper_query = value;
                Task::none()
            }
            Message::SearchPapers => {
                let query = self.paper_query.trim().to_string();
                if query.is_empty() {
                    return Task::none();
                }
                let client = self.client.clone();
                let max_results = self.max_paper_results;
                Task::future(async move {
                    Message::PapersFound(
                        client
                            .search_papers(&query, max_results)
                            .await
                            .map_err(|e| e.to_string()),
                    )
                })
            }
            Message::PapersFound(Ok(results)) => {
                self.paper_results = Some(results);
                Task::none()
            }
            Message::PapersFound(Err(e)) => {
                log::warn!("paper search failed: {}", e);
                self.paper_results = None;
                Task::none()
            }
            Message::Tick => {
                if self.store.any_loading() {
                    self.loading_frame = (self.loading_frame + 1) % 10;
                }
                Task::none()
            }
            Message::Exit => {
                self.store.cancel_active_requests();
                iced::exit()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.store.any_loading() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let body: Element<Message> = if let Some(document) = &self.viewer {
            self.view_viewer(document)
        } else if self.selector_open {
            self.view_selector()
        } else {
            self.view_chat()
        };

        row![self.view_sidebar(), body]
            .spacing(10)
            .padding(10)
            .into()
    }

    fn view_sidebar(&self) -> Element<Message> {
        let mut sidebar = column![
            row![
                button(text("New chat").size(14)).on_press(Message::NewConversation),
                button(text("Scratch").size(14)).on_press(Message::NewScratchConversation),
            ]
            .spacing(5),
        ]
        .spacing(8)
        .width(Length::Fixed(260.0));

        for conversation in self.store.conversations() {
            let current = self.store.current_id() == Some(conversation.id.as_str());
            let prefix = if current { "> " } else { "  " };
            let spinner = if self.store.is_loading(&conversation.id) {
                " *"
            } else {
                ""
            };
            let label = format!("{}{}{}", prefix, conversation.title, spinner);
            sidebar = sidebar.push(
                row![
                    button(text(label).size(13))
                        .on_press(Message::SelectConversation(conversation.id.clone()))
                        .width(Length::Fill),
                    button(text("x").size(13))
                        .on_press(Message::DeleteConversation(conversation.id.clone())),
                ]
                .spacing(4),
            );
        }

        if !self.models.is_empty() {
            let ids: Vec<String> = self.models.iter().map(|m| m.id.clone()).collect();
            sidebar = sidebar.push(text("Model").size(13));
            sidebar = sidebar.push(pick_list(
                ids,
                Some(self.store.selected_model.clone()),
                Message::SelectModel,
            ));
        }

        sidebar = sidebar.push(self.view_mode_row());
        sidebar = sidebar.push(button(text("Sources...").size(14)).on_press(Message::ToggleSelector));
        sidebar = sidebar.push(self.view_paper_search());

        container(sidebar).height(Length::Fill).into()
    }

    fn view_mode_row(&self) -> Element<Message> {
        let locked = self
            .store
            .current()
            .map(|c| c.mode_locked)
            .unwrap_or(false);
        let active_mode = self
            .store
            .current()
            .and_then(|c| c.chat_mode)
            .or(self.store.chat_mode);

        let mut modes = row![].spacing(4);
        for mode in ChatMode::ALL {
            let marker = if active_mode == Some(mode) { "*" } else { " " };
            let label = text(format!("{}{}", marker, mode.label())).size(13);
            // Mode is frozen after the first message; locked conversations
            // get inert buttons.
            let b = if locked {
                button(label)
            } else {
                button(label).on_press(Message::SetMode(mode))
            };
            modes = modes.push(b);
        }
        modes.into()
    }

    fn view_paper_search(&self) -> Element<Message> {
        let mut panel = column![
            text("Find papers on arXiv").size(13),
            row![
                text_input("search query...", &self.paper_query)
                    .on_input(Message::PaperQueryChanged)
                    .on_submit(Message::SearchPapers)
                    .size(13),
                button(text("Go").size(13)).on_press(Message::SearchPapers),
            ]
            .spacing(4),
        ]
        .spacing(4);

        if let Some(results) = &self.paper_results {
            panel = panel.push(text(format!("{} papers found", results.total_found)).size(12));
            for arxiv_id in &results.arxiv_ids {
                panel = panel.push(text(format!("arXiv:{}", arxiv_id)).size(12));
            }
        }
        panel.into()
    }

    fn view_chat(&self) -> Element<Message> {
        let mut messages = column![].spacing(12).padding(10);

        if let Some(conversation) = self.store.current() {
            for message in &conversation.messages {
                messages = messages.push(self.view_message(conversation, message));
            }
        } else {
            messages = messages.push(
                text("Ask a question about your papers, or start an internet search.").size(14),
            );
        }

        let transcript = scrollable(container(messages).width(Length::Fill)).height(Length::Fill);

        let mut chat = column![transcript].spacing(8);

        if let Some(error) = self.store.last_error.as_deref().or(self.pdf_error.as_deref()) {
            chat = chat.push(
                row![
                    text(format!("Error: {}", error)).size(13),
                    button(text("Dismiss").size(13)).on_press(Message::DismissError),
                ]
                .spacing(8),
            );
        }

        let loading = self
            .store
            .current_id()
            .map(|id| self.store.is_loading(id))
            .unwrap_or(false);
        let input_row: Element<Message> = if loading {
            let frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
            row![
                text_input("Waiting for reply... sending again cancels it", &self.input_text)
                    .on_input(Message::InputChanged)
                    .on_submit(Message::Submit)
                    .padding(10)
                    .id(self.input_id.clone()),
                text(frames[self.loading_frame % frames.len()]).size(20),
            ]
            .spacing(8)
            .align_y(alignment::Vertical::Center)
            .into()
        } else {
            text_input("Ask about your documents...", &self.input_text)
                .on_input(Message::InputChanged)
                .on_submit(Message::Submit)
                .padding(10)
                .id(self.input_id.clone())
                .into()
        };
        chat = chat.push(input_row);

        container(chat)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn view_message<'a>(&'a self, conversation: &'a Conversation, message: &'a conversation::Message) -> Element<'a, Message> {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => message.model.as_deref().unwrap_or("assistant"),
        };
        let mut block = column![
            text(who).size(12),
            text(plain_text(&message.content)).size(14),
        ]
        .spacing(4);

        if message.context_used {
            block = block.push(text("(grounded in selected documents)").size(11));
        }

        if !message.formatted_citations.is_empty() {
            // Internet mode: flat 1-based citation indexes.
            let mut citations = row![].spacing(6);
            for citation in &message.formatted_citations {
                let marker = format!("[{}]", citation.index);
                let highlighted = self.highlighted_citation.as_deref() == Some(marker.as_str());
                let label = if highlighted {
                    format!("{} {}", marker, citation.title)
                } else {
                    marker.clone()
                };
                citations = citations.push(
                    button(text(label).size(12)).on_press(Message::InternetCitationClicked {
                        conversation_id: conversation.id.clone(),
                        message_id: message.id.clone(),
                        index: citation.index,
                    }),
                );
            }
            block = block.push(citations);
        } else if !message.search_results.is_empty() {
            let groups = sources::group_results(&message.search_results);
            let mut citations = row![].spacing(6);
            for group in &groups {
                let marker = sources::marker(group);
                let highlighted = self.highlighted_citation.as_deref() == Some(marker.as_str());
                let label = if highlighted {
                    format!("{} {}", marker, group.document.title)
                } else {
                    marker.clone()
                };
                citations = citations.push(
                    button(text(label).size(12)).on_press(Message::CitationClicked {
                        conversation_id: conversation.id.clone(),
                        message_id: message.id.clone(),
                        marker,
                    }),
                );
                for style in [
                    CitationStyle::BibTex,
                    CitationStyle::Apa,
                    CitationStyle::Mla,
                    CitationStyle::Chicago,
                ] {
                    citations = citations.push(
                        button(text(style.label()).size(11)).on_press(Message::CopyCitation {
                            conversation_id: conversation.id.clone(),
                            message_id: message.id.clone(),
                            document_id: group.document.id.clone(),
                            style,
                        }),
                    );
                }
            }
            block = block.push(citations);
        }

        block.into()
    }

    fn view_selector(&self) -> Element<Message> {
        let mut panel = column![text("Retrieval sources").size(16)]
            .spacing(8)
            .padding(10);

        panel = panel.push(text("Workspaces").size(14));
        for workspace in &self.workspaces {
            let mark = if self.selection.workspace_selected(&workspace.id) {
                "[x]"
            } else {
                "[ ]"
            };
            panel = panel.push(
                button(text(format!("{} {}", mark, workspace.name)).size(13))
                    .on_press(Message::ToggleWorkspace(workspace.id.clone())),
            );
            if self.selection.workspace_selected(&workspace.id) {
                for document in &workspace.documents {
                    let mark = if self.selection.document_selected(&workspace.id, &document.id) {
                        "[x]"
                    } else {
                        "[ ]"
                    };
                    panel = panel.push(
                        button(text(format!("    {} {}", mark, document.title)).size(12)).on_press(
                            Message::ToggleDocument(workspace.id.clone(), document.id.clone()),
                        ),
                    );
                }
            }
        }

        panel = panel.push(text("Web search domains").size(14));
        for (index, group) in self.domain_groups.iter().enumerate() {
            let mark = if self.selection.group_selected(group) {
                "[x]"
            } else {
                "[ ]"
            };
            panel = panel.push(
                button(text(format!("{} {} (all)", mark, group.name)).size(13))
                    .on_press(Message::ToggleDomainGroup(index)),
            );
            for domain in &group.domains {
                let mark = if self.selection.domain_selected(domain) {
                    "[x]"
                } else {
                    "[ ]"
                };
                panel = panel.push(
                    button(text(format!("    {} {}", mark, domain)).size(12))
                        .on_press(Message::ToggleDomain(domain.clone())),
                );
            }
        }

        panel = panel.push(
            row![
                button(text("Apply").size(14)).on_press(Message::ApplySelection),
                button(text("Cancel").size(14)).on_press(Message::ToggleSelector),
            ]
            .spacing(8),
        );

        scrollable(container(panel).width(Length::Fill))
            .height(Length::Fill)
            .into()
    }

    fn view_viewer(&self, document: &PdfDocument) -> Element<Message> {
        container(
            column![
                text(document.title.clone()).size(16),
                text(format!(
                    "{} — {} KiB, opened at page {}",
                    document.filename,
                    document.bytes.len() / 1024,
                    self.viewer_page
                ))
                .size(13),
                button(text("Close").size(14)).on_press(Message::ClosePdf),
            ]
            .spacing(10)
            .align_x(alignment::Horizontal::Center),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .align_x(alignment::Horizontal::Center)
        .align_y(alignment::Vertical::Center)
        .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
