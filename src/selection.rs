use std::collections::{BTreeMap, BTreeSet};

use crate::conversation::Conversation;

/// A named batch of web-search domains that can be toggled together.
#[derive(Debug, Clone)]
pub struct DomainGroup {
    pub name: String,
    pub domains: Vec<String>,
}

impl DomainGroup {
    pub fn new(name: &str, domains: &[&str]) -> Self {
        DomainGroup {
            name: name.to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Built-in domain groups offered by the internet-search selector.
pub fn default_domain_groups() -> Vec<DomainGroup> {
    vec![
        DomainGroup::new("Preprints", &["arxiv.org", "biorxiv.org", "ssrn.com"]),
        DomainGroup::new("Publishers", &["nature.com", "sciencedirect.com", "springer.com"]),
        DomainGroup::new("Indexes", &["scholar.google.com", "semanticscholar.org", "pubmed.ncbi.nlm.nih.gov"]),
    ]
}

/// Pending selector state. Edits accumulate here and land on the owning
/// conversation only on an explicit apply, never incrementally.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    workspaces: BTreeSet<String>,
    documents: BTreeMap<String, BTreeSet<String>>,
    domains: BTreeSet<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        SelectionState::default()
    }

    /// Seed the selector from a conversation's stored selections.
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let mut state = SelectionState::new();
        state.workspaces = conversation.selected_workspaces.iter().cloned().collect();
        for (workspace, docs) in &conversation.selected_documents {
            state
                .documents
                .insert(workspace.clone(), docs.iter().cloned().collect());
        }
        state.domains = conversation.selected_domains.iter().cloned().collect();
        state
    }

    pub fn toggle_workspace(&mut self, id: &str) {
        if !self.workspaces.remove(id) {
            self.workspaces.insert(id.to_string());
        } else {
            self.documents.remove(id);
        }
    }

    pub fn workspace_selected(&self, id: &str) -> bool {
        self.workspaces.contains(id)
    }

    pub fn toggle_document(&mut self, workspace_id: &str, doc_id: &str) {
        let docs = self.documents.entry(workspace_id.to_string()).or_default();
        if !docs.remove(doc_id) {
            docs.insert(doc_id.to_string());
        }
        if docs.is_empty() {
            self.documents.remove(workspace_id);
        }
    }

    pub fn document_selected(&self, workspace_id: &str, doc_id: &str) -> bool {
        self.documents
            .get(workspace_id)
            .map(|docs| docs.contains(doc_id))
            .unwrap_or(false)
    }

    pub fn toggle_domain(&mut self, domain: &str) {
        if !self.domains.remove(domain) {
            self.domains.insert(domain.to_string());
        }
    }

    pub fn domain_selected(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// A group reads as selected only when every member is selected.
    pub fn group_selected(&self, group: &DomainGroup) -> bool {
        !group.domains.is_empty() && group.domains.iter().all(|d| self.domains.contains(d))
    }

    /// Fully-selected groups deselect as a whole; anything less selects the
    /// remaining members.
    pub fn toggle_group(&mut self, group: &DomainGroup) {
        if self.group_selected(group) {
            for domain in &group.domains {
                self.domains.remove(domain);
            }
        } else {
            for domain in &group.domains {
                self.domains.insert(domain.clone());
            }
        }
    }

    pub fn selected_domains(&self) -> Vec<String> {
        self.domains.iter().cloned().collect()
    }

    /// Copy the whole selection onto the conversation in one shot.
    pub fn apply(&self, conversation: &mut Conversation) {
        conversation.selected_workspaces = self.workspaces.iter().cloned().collect();
        conversation.selected_documents = self
            .documents
            .iter()
            .map(|(ws, docs)| (ws.clone(), docs.iter().cloned().collect()))
            .collect();
        conversation.selected_domains = self.domains.iter().cloned().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Conversation;

    #[test]
    fn group_selected_requires_every_member() {
        let group = DomainGroup::new("Preprints", &["arxiv.org", "biorxiv.org"]);
        let mut state = SelectionState::new();
        state.toggle_domain("arxiv.org");
        assert!(!state.group_selected(&group));
        state.toggle_domain("biorxiv.org");
        assert!(state.group_selected(&group));
    }

    #[test]
    fn toggle_group_selects_then_clears() {
        let group = DomainGroup::new("Preprints", &["arxiv.org", "biorxiv.org"]);
        let mut state = SelectionState::new();
        state.toggle_domain("arxiv.org");
        state.toggle_group(&group);
        assert!(state.group_selected(&group));
        state.toggle_group(&group);
        assert!(!state.domain_selected("arxiv.org"));
        assert!(!state.domain_selected("biorxiv.org"));
    }

    #[test]
    fn deselecting_workspace_drops_its_documents() {
        let mut state = SelectionState::new();
        state.toggle_workspace("ws1");
        state.toggle_document("ws1", "doc1");
        assert!(state.document_selected("ws1", "doc1"));
        state.toggle_workspace("ws1");
        assert!(!state.workspace_selected("ws1"));
        assert!(!state.document_selected("ws1", "doc1"));
    }

    #[test]
    fn apply_copies_everything_at_once() {
        let mut state = SelectionState::new();
        state.toggle_workspace("ws1");
        state.toggle_document("ws1", "doc1");
        state.toggle_document("ws1", "doc2");
        state.toggle_domain("arxiv.org");

        let mut conversation = Conversation::new(None, "model-a", false);
        state.apply(&mut conversation);
        assert_eq!(conversation.selected_workspaces, vec!["ws1"]);
        assert_eq!(
            conversation.selected_documents.get("ws1").unwrap(),
            &vec!["doc1".to_string(), "doc2".to_string()]
        );
        assert_eq!(conversation.selected_domains, vec!["arxiv.org"]);
    }

    #[test]
    fn round_trips_through_conversation() {
        let mut state = SelectionState::new();
        state.toggle_workspace("ws1");
        state.toggle_domain("arxiv.org");

        let mut conversation = Conversation::new(None, "model-a", false);
        state.apply(&mut conversation);

        let restored = SelectionState::from_conversation(&conversation);
        assert!(restored.workspace_selected("ws1"));
        assert!(restored.domain_selected("arxiv.org"));
    }
}
