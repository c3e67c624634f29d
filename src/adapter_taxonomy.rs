//! Structured-knowledge adapter over a compiled-in attack technique
//! taxonomy.
//!
//! Nothing is parsed at runtime: the technique and mitigation tables below
//! are hand-authored, so every triplet carries confidence 1.0. Techniques
//! are grouped into collections by tactic; mitigations live in the
//! `mitigations` collection.

use async_trait::async_trait;
use knowledge_harness_core::models::{content_hash, RelationTriplet, RetrievalDocument};
use knowledge_harness_core::{KnowledgeError, Result};
use std::collections::BTreeSet;

use crate::config::{SourceSettings, TaxonomySourceConfig};
use crate::traits::SourceAdapter;

pub const MITIGATIONS_COLLECTION: &str = "mitigations";

pub struct Technique {
    pub id: &'static str,
    pub name: &'static str,
    pub tactic: &'static str,
    pub description: &'static str,
    pub tools: &'static [&'static str],
    pub mitigations: &'static [&'static str],
}

pub struct Mitigation {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub static TECHNIQUES: &[Technique] = &[
    Technique {
        id: "T1190",
        name: "Exploit Public-Facing Application",
        tactic: "initial_access",
        description: "Adversaries exploit a weakness in an Internet-facing host or program, such as a web application vulnerable to SQL injection, to gain initial access to a network.",
        tools: &["sqlmap", "nikto", "burpsuite"],
        mitigations: &["M1048", "M1050", "M1030", "M1026", "M1051"],
    },
    Technique {
        id: "T1566",
        name: "Phishing",
        tactic: "initial_access",
        description: "Adversaries send messages with malicious attachments or links to trick users into executing code or revealing credentials.",
        tools: &["gophish", "setoolkit"],
        mitigations: &["M1017", "M1049", "M1031", "M1054"],
    },
    Technique {
        id: "T1059",
        name: "Command and Scripting Interpreter",
        tactic: "execution",
        description: "Adversaries abuse shells and scripting interpreters such as bash, PowerShell or Python to execute commands and payloads.",
        tools: &["bash", "powershell", "python"],
        mitigations: &["M1038", "M1042", "M1026", "M1049"],
    },
    Technique {
        id: "T1078",
        name: "Valid Accounts",
        tactic: "persistence",
        description: "Adversaries obtain and abuse credentials of existing accounts to keep access while blending in with normal activity.",
        tools: &[],
        mitigations: &["M1032", "M1027", "M1026", "M1036"],
    },
    Technique {
        id: "T1110",
        name: "Brute Force",
        tactic: "credential_access",
        description: "Adversaries guess passwords repeatedly, spray common passwords, or crack captured hashes to obtain valid credentials.",
        tools: &["hydra", "medusa", "john"],
        mitigations: &["M1036", "M1032", "M1027"],
    },
    Technique {
        id: "T1003",
        name: "OS Credential Dumping",
        tactic: "credential_access",
        description: "Adversaries dump credentials from the operating system, for example from LSASS memory or the SAM database, to move further through the environment.",
        tools: &["mimikatz", "secretsdump"],
        mitigations: &["M1043", "M1027", "M1026"],
    },
    Technique {
        id: "T1046",
        name: "Network Service Discovery",
        tactic: "discovery",
        description: "Adversaries enumerate services running on remote hosts, typically with port scans, to identify targets for exploitation.",
        tools: &["nmap", "masscan", "netcat"],
        mitigations: &["M1031", "M1030", "M1042"],
    },
    Technique {
        id: "T1021",
        name: "Remote Services",
        tactic: "lateral_movement",
        description: "Adversaries use valid accounts to log into services that accept remote connections, such as SSH, RDP or SMB, to move between hosts.",
        tools: &["ssh", "psexec", "xfreerdp"],
        mitigations: &["M1032", "M1042", "M1030", "M1026"],
    },
    Technique {
        id: "T1071",
        name: "Application Layer Protocol",
        tactic: "command_and_control",
        description: "Adversaries communicate with compromised hosts over common application protocols such as HTTP or DNS to avoid detection.",
        tools: &["curl", "dnscat2"],
        mitigations: &["M1031", "M1037"],
    },
    Technique {
        id: "T1048",
        name: "Exfiltration Over Alternative Protocol",
        tactic: "exfiltration",
        description: "Adversaries steal data over a protocol other than the existing command channel, such as DNS, FTP or ICMP.",
        tools: &["iodine", "dnscat2"],
        mitigations: &["M1037", "M1031", "M1030", "M1057"],
    },
];

pub static MITIGATIONS: &[Mitigation] = &[
    Mitigation { id: "M1017", name: "User Training", description: "Train users to recognize social engineering and suspicious messages." },
    Mitigation { id: "M1026", name: "Privileged Account Management", description: "Restrict and monitor the creation, use and permissions of privileged accounts." },
    Mitigation { id: "M1027", name: "Password Policies", description: "Require long, unique passwords and lock out repeated failures." },
    Mitigation { id: "M1030", name: "Network Segmentation", description: "Separate critical systems and services into isolated network segments." },
    Mitigation { id: "M1031", name: "Network Intrusion Prevention", description: "Block known malicious traffic patterns at network boundaries." },
    Mitigation { id: "M1032", name: "Multi-factor Authentication", description: "Require a second factor in addition to the password." },
    Mitigation { id: "M1036", name: "Account Use Policies", description: "Lock accounts after failed logins and restrict when and where they may be used." },
    Mitigation { id: "M1037", name: "Filter Network Traffic", description: "Block unneeded protocols and destinations at the host and network level." },
    Mitigation { id: "M1038", name: "Execution Prevention", description: "Block execution of unapproved scripts and binaries." },
    Mitigation { id: "M1042", name: "Disable or Remove Feature or Program", description: "Remove services, interpreters and features that are not required." },
    Mitigation { id: "M1043", name: "Credential Access Protection", description: "Harden the operating system against reading credential material from memory." },
    Mitigation { id: "M1048", name: "Application Isolation and Sandboxing", description: "Confine exposed applications so exploitation does not reach the host." },
    Mitigation { id: "M1049", name: "Antivirus/Antimalware", description: "Detect and quarantine malicious files and scripts." },
    Mitigation { id: "M1050", name: "Exploit Protection", description: "Use platform protections that make exploitation of memory corruption harder." },
    Mitigation { id: "M1051", name: "Update Software", description: "Patch exposed software promptly." },
    Mitigation { id: "M1054", name: "Software Configuration", description: "Apply secure configuration such as mail authentication and link protection." },
    Mitigation { id: "M1057", name: "Data Loss Prevention", description: "Detect and block sensitive data leaving the environment." },
];

fn mitigation(id: &str) -> Option<&'static Mitigation> {
    MITIGATIONS.iter().find(|m| m.id == id)
}

fn known_tactics() -> BTreeSet<&'static str> {
    TECHNIQUES.iter().map(|t| t.tactic).collect()
}

pub struct TaxonomyAdapter {
    config: TaxonomySourceConfig,
}

impl TaxonomyAdapter {
    pub fn new(config: TaxonomySourceConfig) -> Self {
        Self { config }
    }

    fn techniques(&self) -> impl Iterator<Item = &'static Technique> + '_ {
        TECHNIQUES.iter().filter(move |t| {
            self.config.tactics.is_empty() || self.config.tactics.iter().any(|x| x == t.tactic)
        })
    }

    /// Mitigations referenced by the selected techniques, in table order.
    fn mitigations(&self) -> Vec<&'static Mitigation> {
        if !self.config.include_mitigations {
            return Vec::new();
        }
        let referenced: BTreeSet<&str> = self
            .techniques()
            .flat_map(|t| t.mitigations.iter().copied())
            .collect();
        MITIGATIONS
            .iter()
            .filter(|m| referenced.contains(m.id))
            .collect()
    }

    fn technique_document(&self, t: &Technique) -> RetrievalDocument {
        let mitigations: Vec<String> = t
            .mitigations
            .iter()
            .filter_map(|id| mitigation(id))
            .map(|m| format!("{} {}", m.id, m.name))
            .collect();

        let mut content = format!(
            "Technique: {} {}\nTactic: {}\n\n{}\n",
            t.id, t.name, t.tactic, t.description
        );
        if !t.tools.is_empty() {
            content.push_str(&format!("\nTools: {}\n", t.tools.join(", ")));
        }
        if !mitigations.is_empty() {
            content.push_str(&format!("Mitigations: {}\n", mitigations.join(", ")));
        }
        let hash = content_hash(&content);

        RetrievalDocument::new(format!("taxonomy:{}", t.id), content)
            .with("title", format!("{}: {}", t.id, t.name))
            .with("technique_id", t.id)
            .with("tactic", t.tactic)
            .with(
                "tools",
                t.tools.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )
            .with("collection", t.tactic)
            .with("source", self.source_label())
            .with("source_type", self.source_type())
            .with("content_hash", hash)
    }

    fn mitigation_document(&self, m: &Mitigation) -> RetrievalDocument {
        let content = format!("Mitigation: {} {}\n\n{}\n", m.id, m.name, m.description);
        let hash = content_hash(&content);
        RetrievalDocument::new(format!("taxonomy:{}", m.id), content)
            .with("title", format!("{}: {}", m.id, m.name))
            .with("mitigation_id", m.id)
            .with("collection", MITIGATIONS_COLLECTION)
            .with("source", self.source_label())
            .with("source_type", self.source_type())
            .with("content_hash", hash)
    }

    fn technique_triplets(&self, t: &Technique, source: &str) -> Vec<RelationTriplet> {
        let mut out = vec![
            RelationTriplet::new(t.name, "is_a", "attack_technique", 1.0, source),
            RelationTriplet::new(t.name, "has_id", t.id, 1.0, source),
            RelationTriplet::new(t.name, "belongs_to_tactic", t.tactic, 1.0, source),
        ];
        for m in t.mitigations.iter().filter_map(|id| mitigation(id)) {
            out.push(RelationTriplet::new(t.name, "mitigated_by", m.name, 1.0, source));
        }
        for tool in t.tools {
            out.push(RelationTriplet::new(t.name, "uses_tool", *tool, 1.0, source));
        }
        out
    }

    fn mitigation_triplets(&self, m: &Mitigation, source: &str) -> Vec<RelationTriplet> {
        vec![
            RelationTriplet::new(m.name, "is_a", "mitigation", 1.0, source),
            RelationTriplet::new(m.name, "has_id", m.id, 1.0, source),
        ]
    }

    fn wants(collection: Option<&str>, name: &str) -> bool {
        collection.map_or(true, |c| c == name)
    }
}

#[async_trait]
impl SourceAdapter for TaxonomyAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.config.settings
    }

    fn source_type(&self) -> &str {
        "taxonomy"
    }

    fn validate_config(&self) -> Result<()> {
        let known = known_tactics();
        if let Some(bad) = self
            .config
            .tactics
            .iter()
            .find(|t| !known.contains(t.as_str()))
        {
            return Err(KnowledgeError::invalid(
                self.name(),
                format!("unknown tactic: '{}'", bad),
            ));
        }
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn get_documents(&self, collection: Option<&str>) -> Result<Vec<RetrievalDocument>> {
        let mut docs: Vec<RetrievalDocument> = self
            .techniques()
            .filter(|t| Self::wants(collection, t.tactic))
            .map(|t| self.technique_document(t))
            .collect();
        if Self::wants(collection, MITIGATIONS_COLLECTION) {
            docs.extend(self.mitigations().into_iter().map(|m| self.mitigation_document(m)));
        }
        Ok(docs)
    }

    async fn get_triplets(&self, collection: Option<&str>) -> Result<Vec<RelationTriplet>> {
        let source = self.source_label();
        let mut triplets: Vec<RelationTriplet> = self
            .techniques()
            .filter(|t| Self::wants(collection, t.tactic))
            .flat_map(|t| self.technique_triplets(t, &source))
            .collect();
        if Self::wants(collection, MITIGATIONS_COLLECTION) {
            for m in self.mitigations() {
                triplets.extend(self.mitigation_triplets(m, &source));
            }
        }
        Ok(triplets)
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let mut collections: BTreeSet<String> =
            self.techniques().map(|t| t.tactic.to_string()).collect();
        if self.config.include_mitigations {
            collections.insert(MITIGATIONS_COLLECTION.to_string());
        }
        Ok(collections)
    }
}
