//! Static classification of entity types.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use tenantry_core::SecurityClass;

/// The partner entity. Always [`SecurityClass::SharedPartner`].
pub const PARTNER_ENTITY: &str = "res.partner";

/// Classes with membership lists, highest priority first.
/// Anything not listed is [`SecurityClass::TenantScoped`].
const PRIORITY: [SecurityClass; 4] = [
    SecurityClass::NoAccess,
    SecurityClass::GlobalReadShared,
    SecurityClass::TenantScopedReadShared,
    SecurityClass::Tenants,
];

const TENANTS: &[&str] = &["res.company", "res.users"];

const TENANT_SCOPED_READ_SHARED: &[&str] = &[
    "account.account.type",
    "ir.actions.act_url",
    "ir.actions.act_window",
    "ir.actions.act_window_close",
    "ir.actions.act_window.view",
    "ir.actions.actions",
    "ir.actions.client",
    "ir.actions.report",
    "ir.actions.server",
    "ir.actions.todo",
    "ir.attachment",
    "ir.filters",
    "ir.mail.server",
    "ir.model.data",
    "ir.translation",
    "ir.ui.menu",
    "ir.ui.view",
    "mail.template",
    "res.field",
    "res.field.selection_value",
    "stock.location",
    "uom.uom",
];

const GLOBAL_READ_SHARED: &[&str] = &[
    // base, ir, res
    "base.language.export",
    "base.language.import",
    "base.language.install",
    "base.module.uninstall",
    "base.module.update",
    "base.module.upgrade",
    "base.update.translations",
    "base_import.import",
    "ir.cron",
    "ir.logging",
    "ir.model",
    "ir.model.access",
    "ir.model.constraint",
    "ir.model.fields",
    "ir.model.relation",
    "ir.module.category",
    "ir.module.module",
    "ir.module.module.dependency",
    "ir.module.module.exclusion",
    "ir.rule",
    "ir.server.object.lines",
    "res.bank",
    "res.config",
    "res.config.installer",
    "res.config.settings",
    "res.country",
    "res.country.state",
    "res.currency",
    "res.groups",
    "res.lang",
    "res.partner.industry",
    "res.request.link",
    // apps
    "account.payment.method",
    "account.tax.group",
    "change.password.user",
    "change.password.wizard",
    "l10n_no_payroll.tabelltrekk",
    "mail.activity.type",
    "payment.icon",
    "report.layout",
    "report.paperformat",
    "uom.category",
    "web_tour.tour",
    "wizard.ir.model.menu.create",
];

const NO_ACCESS: &[&str] = &["ir.config_parameter"];

static BUILTIN: LazyLock<Classifier> = LazyLock::new(|| {
    Classifier::new()
        .with_members(SecurityClass::Tenants, TENANTS.iter().copied())
        .with_members(
            SecurityClass::TenantScopedReadShared,
            TENANT_SCOPED_READ_SHARED.iter().copied(),
        )
        .with_members(
            SecurityClass::GlobalReadShared,
            GLOBAL_READ_SHARED.iter().copied(),
        )
        .with_members(SecurityClass::NoAccess, NO_ACCESS.iter().copied())
});

/// Priority-ordered membership lookup.
///
/// Resolution order: partner entity, no-access, global-read-shared,
/// tenant-scoped-read-shared, tenants, then the tenant-scoped default.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    members: BTreeMap<SecurityClass, BTreeSet<String>>,
}

impl Classifier {
    /// An empty classifier: everything but the partner entity is tenant scoped.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog.
    pub fn builtin() -> &'static Classifier {
        &BUILTIN
    }

    /// Add entity types to a class's membership list.
    pub fn with_members<I, S>(mut self, class: SecurityClass, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members
            .entry(class)
            .or_default()
            .extend(entities.into_iter().map(Into::into));
        self
    }

    pub fn classify(&self, entity: &str) -> SecurityClass {
        if entity == PARTNER_ENTITY {
            return SecurityClass::SharedPartner;
        }
        PRIORITY
            .iter()
            .find(|class| {
                self.members
                    .get(*class)
                    .is_some_and(|members| members.contains(entity))
            })
            .copied()
            .unwrap_or(SecurityClass::TenantScoped)
    }

    /// Entity types listed under `class`.
    pub fn members(&self, class: SecurityClass) -> impl Iterator<Item = &str> {
        self.members
            .get(&class)
            .into_iter()
            .flat_map(|m| m.iter().map(String::as_str))
    }
}

/// Classify with the built-in catalog.
pub fn classify(entity: &str) -> SecurityClass {
    Classifier::builtin().classify(entity)
}
