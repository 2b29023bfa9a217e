//! Built-in agents and the tool catalogue shown to users.

use serde::Serialize;

use crate::db::models::{Agent, DEFAULT_AVATAR, DEFAULT_VERSION};

/// A tool family users can enable on an agent.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    #[serde(skip)]
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    /// Dispatcher category the entry expands to.
    #[serde(skip)]
    pub category: &'static str,
}

pub const AVAILABLE_TOOLS: &[CatalogEntry] = &[
    CatalogEntry {
        id: "web_search",
        name: "Búsqueda Web",
        description: "Buscar información actualizada en internet",
        icon: "🌐",
        category: "web_search",
    },
    CatalogEntry {
        id: "google_calendar",
        name: "Google Calendar",
        description: "Acceder y gestionar calendarios",
        icon: "📅",
        category: "calendar",
    },
    CatalogEntry {
        id: "google_drive",
        name: "Google Drive",
        description: "Crear, leer y gestionar documentos",
        icon: "📁",
        category: "google_drive",
    },
    CatalogEntry {
        id: "jira",
        name: "JIRA",
        description: "Crear y gestionar tickets de proyecto",
        icon: "🎫",
        category: "jira",
    },
    CatalogEntry {
        id: "email",
        name: "Email",
        description: "Enviar correos electrónicos",
        icon: "📧",
        category: "email",
    },
];

pub fn catalog_entry(id: &str) -> Option<&'static CatalogEntry> {
    AVAILABLE_TOOLS.iter().find(|e| e.id == id)
}

/// Catalogue as an `{id: {name, description, icon}}` JSON object.
pub fn catalog_json<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .into_iter()
        .map(|e| {
            (
                e.id.to_string(),
                serde_json::json!({"name": e.name, "description": e.description, "icon": e.icon}),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}

const POSI_PROMPT: &str = "Eres Posi, el asistente de IA de Positive IT. Tu objetivo es ayudar a los empleados con información sobre la empresa, procesos internos y cualquier consulta relacionada con Positive IT.

Contexto sobre Positive IT:
- Somos una empresa de desarrollo de software
- Especializados en soluciones empresariales
- Trabajamos con tecnologías modernas
- Tenemos un equipo de profesionales altamente calificados

Responde de manera amigable y profesional. Si no tienes información específica sobre algo, indícalo claramente.";

const MINUTA_PROMPT: &str = "Eres Minuta Maker, un agente especializado en procesar transcripciones de reuniones y crear minutas profesionales.

Tu función es:
1. Analizar transcripciones de reuniones
2. Crear minutas estructuradas con:
   - Resumen ejecutivo
   - Puntos principales discutidos
   - Decisiones tomadas
   - Próximos pasos por equipo
   - Fechas límite
3. Generar documentos listos para enviar por email

Formato de minuta:
# MINUTA DE REUNIÓN
**Cliente:** [Nombre del cliente]
**Fecha:** [Fecha de la reunión]
**Participantes:** [Lista de participantes]

## Resumen Ejecutivo
[Resumen de 2-3 líneas]

## Puntos Principales
- [Punto 1]
- [Punto 2]

## Decisiones Tomadas
- [Decisión 1]
- [Decisión 2]

## Próximos Pasos
### Equipo A
- [ ] [Tarea 1] - [Responsable] - [Fecha límite]
- [ ] [Tarea 2] - [Responsable] - [Fecha límite]

### Equipo B
- [ ] [Tarea 1] - [Responsable] - [Fecha límite]

## Fecha de Próxima Reunión
[Fecha y hora]";

const JIRA_PROMPT: &str = "Eres JIRA Assistant, un agente especializado en crear y gestionar tarjetas en JIRA.

Tu función es:
1. Entender los requerimientos del cliente
2. Crear tarjetas JIRA apropiadas
3. Asignar prioridades y etiquetas
4. Establecer estimaciones de tiempo
5. Vincular tarjetas relacionadas

Tipos de tarjetas que puedes crear:
- Story: Funcionalidad desde la perspectiva del usuario
- Bug: Problemas reportados
- Task: Trabajo técnico
- Epic: Grupo de historias relacionadas

Información requerida para crear tarjetas:
- Título claro y descriptivo
- Descripción detallada
- Tipo de tarjeta
- Proyecto (ej. \"PROYECTO-A\")
- Prioridad (ej. \"High\", \"Medium\", \"Low\")
- Asignado (opcional)
- Estimación de tiempo (opcional)

Ejemplo de cómo solicitar información:
\"Necesito crear una Story para el proyecto 'PROYECTO-X' con el título 'Implementar login de usuarios' y descripción 'Desarrollar la funcionalidad de inicio de sesión y registro'.\"

Si falta información, pregunta al usuario de forma clara y concisa.";

struct Builtin {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    tools: &'static [&'static str],
    context_type: &'static str,
    avatar: &'static str,
    system_prompt: &'static str,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        id: "posiAgent",
        name: "Posi",
        description: "Asistente general de Positive IT",
        tools: &["web_search", "google_calendar", "google_drive"],
        context_type: "general",
        avatar: DEFAULT_AVATAR,
        system_prompt: POSI_PROMPT,
    },
    Builtin {
        id: "minutaMaker",
        name: "Minuta Maker",
        description: "Creador de minutas de reuniones",
        tools: &["google_drive", "google_calendar", "email"],
        context_type: "client_specific",
        avatar: "📝",
        system_prompt: MINUTA_PROMPT,
    },
    Builtin {
        id: "jiraAssistant",
        name: "JIRA Assistant",
        description: "Gestor de tarjetas JIRA",
        tools: &["jira", "google_drive", "google_calendar"],
        context_type: "client_specific",
        avatar: "🎫",
        system_prompt: JIRA_PROMPT,
    },
];

fn to_agent(b: &Builtin) -> Agent {
    Agent {
        id: b.id.to_string(),
        name: b.name.to_string(),
        description: b.description.to_string(),
        system_prompt: b.system_prompt.to_string(),
        tools: b.tools.iter().map(|t| t.to_string()).collect(),
        context_type: b.context_type.to_string(),
        enabled: true,
        avatar: b.avatar.to_string(),
        category: "general".to_string(),
        version: DEFAULT_VERSION.to_string(),
        created_at: None,
        updated_at: None,
        created_by: None,
        updated_by: None,
    }
}

pub fn builtin_agents() -> Vec<Agent> {
    BUILTINS.iter().map(to_agent).collect()
}

pub fn builtin_agent(id: &str) -> Option<Agent> {
    BUILTINS.iter().find(|b| b.id == id).map(to_agent)
}

pub fn is_builtin(id: &str) -> bool {
    BUILTINS.iter().any(|b| b.id == id)
}
